/// Context object tying the cache, the review histories and the settings
/// together. Everything a session does goes through one `Workspace`.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[cfg(feature = "file-watcher")]
use std::sync::Mutex;

use crate::cache::{ChangeTracker, FileDataCache, Reconfigured};
use crate::config::RecallConfig;
use crate::history::HistoryStore;
use crate::scheduler::{self, ReviewQueue};
use crate::types::{Card, FileData, ReviewOutcome};

#[cfg(feature = "file-watcher")]
use crate::watcher::FileWatcher;

pub struct Workspace {
    config: RwLock<RecallConfig>,
    cache: Arc<FileDataCache>,
    history: HistoryStore,
    #[cfg(feature = "file-watcher")]
    watcher: Mutex<Option<FileWatcher>>,
}

impl Workspace {
    pub fn new(config: RecallConfig, roots: Vec<PathBuf>) -> Self {
        let cache = Arc::new(FileDataCache::new(&config, roots));
        Self {
            config: RwLock::new(config),
            cache,
            history: HistoryStore::new(),
            #[cfg(feature = "file-watcher")]
            watcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> RecallConfig {
        self.config.read().unwrap().clone()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.cache.roots()
    }

    pub fn cache(&self) -> &FileDataCache {
        &self.cache
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Bumped whenever cached data is invalidated.
    pub fn changes(&self) -> &ChangeTracker {
        self.cache.changes()
    }

    /// Apply new settings or roots. Filesystem watches are rebuilt when the
    /// roots or the include/exclude patterns change.
    pub fn configure(&self, config: RecallConfig, roots: Vec<PathBuf>) -> Reconfigured {
        let changed = self.cache.configure(&config, roots);
        *self.config.write().unwrap() = config;

        #[cfg(feature = "file-watcher")]
        if changed.needs_rewatch() && self.watcher.lock().unwrap().is_some() {
            if let Err(e) = self.start_watching() {
                log::error!("[recall.watcher.error] Failed to rebuild watch: {}", e);
            }
        }
        changed
    }

    /// (Re)build the recursive watch over all roots, disposing any previous one.
    #[cfg(feature = "file-watcher")]
    pub fn start_watching(&self) -> Result<(), notify::Error> {
        let mut slot = self.watcher.lock().unwrap();
        *slot = None;

        let mut watcher = FileWatcher::new(self.cache.clone())?;
        for root in self.cache.roots() {
            watcher.watch_root(&root)?;
        }
        *slot = Some(watcher);
        Ok(())
    }

    #[cfg(feature = "file-watcher")]
    pub fn stop_watching(&self) {
        if self.watcher.lock().unwrap().take().is_some() {
            log::info!("[recall.watcher.stop] Watch disposed");
        }
    }

    #[cfg(feature = "file-watcher")]
    pub fn is_watching(&self) -> bool {
        self.watcher.lock().unwrap().is_some()
    }

    /// Roots under the current watch, sorted. Empty when not watching.
    #[cfg(feature = "file-watcher")]
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        let mut roots = self
            .watcher
            .lock()
            .unwrap()
            .as_ref()
            .map(|watcher| watcher.watched_roots().to_vec())
            .unwrap_or_default();
        roots.sort();
        roots
    }

    /// Copy of the cached data with scheduling fields replayed from history.
    async fn annotate(&self, data: &FileData) -> FileData {
        let mut data = data.clone();
        if let Some(root) = data.root.clone() {
            self.history.add_folder(&root).await;
            self.history.get_cards_recall(&root, data.cards.iter_mut()).await;
        }
        data
    }

    pub async fn file(&self, path: &Path) -> FileData {
        let data = self.cache.get_file_data(path).await;
        self.annotate(&data).await
    }

    pub async fn files(&self) -> BTreeMap<PathBuf, FileData> {
        self.files_filtered(|_| true).await
    }

    pub async fn files_filtered<F>(&self, filter: F) -> BTreeMap<PathBuf, FileData>
    where
        F: Fn(&Path) -> bool,
    {
        let mut result = BTreeMap::new();
        for (path, data) in self.cache.get_files_data_filtered(filter).await {
            result.insert(path, self.annotate(&data).await);
        }
        result
    }

    /// Due cards across all files at `now`, limited by `newCardLimit`.
    pub async fn review_queue(&self, now: i64) -> ReviewQueue {
        let limit = self.config.read().unwrap().new_card_limit;
        let files = self.files().await;
        ReviewQueue::build(files.values(), now, limit)
    }

    /// Review queue restricted to a single document.
    pub async fn review_queue_for(&self, path: &Path, now: i64) -> ReviewQueue {
        let limit = self.config.read().unwrap().new_card_limit;
        let data = self.file(path).await;
        ReviewQueue::build([&data], now, limit)
    }

    /// Apply a review outcome to `card` (taken from `path`) and log it.
    pub async fn process_review_result(
        &self,
        path: &Path,
        card: &mut Card,
        outcome: ReviewOutcome,
        now: i64,
    ) {
        scheduler::apply_review(card, outcome, now);
        if let Some(root) = self.cache.root_of(path) {
            self.history.add_folder(&root).await;
            self.history.log_card_recall(&root, card, None, None).await;
        } else {
            log::warn!(
                "[recall.workspace.review] {:?} is outside every workspace root; review not logged",
                path
            );
        }
    }

    /// Carry the history of `original` over to its edited replacement `card`
    /// in `path`, recording the link in the log.
    pub async fn daisychain_card(&self, path: &Path, card: &mut Card, original: &Card) {
        scheduler::daisychain_card(card, original);
        if let Some(root) = self.cache.root_of(path) {
            self.history.add_folder(&root).await;
            self.history
                .log_card_recall(&root, card, original.last_review_date, Some(original.checksum()))
                .await;
        } else {
            log::warn!(
                "[recall.workspace.review] {:?} is outside every workspace root; link not logged",
                path
            );
        }
    }

    /// The card (and its file) whose checksum set contains `checksum`.
    pub async fn find_card(&self, checksum: &str) -> Option<(PathBuf, Card)> {
        self.files()
            .await
            .into_iter()
            .find_map(|(path, data)| {
                data.cards
                    .into_iter()
                    .find(|card| card.has_checksum(checksum))
                    .map(|card| (path, card))
            })
    }

    /// Archive the card identified by `checksum`. `None` when no card matches.
    pub async fn archive_card(&self, checksum: &str, now: i64) -> Option<(PathBuf, Card)> {
        let Some((path, mut card)) = self.find_card(checksum).await else {
            log::warn!("[recall.workspace.archive] No card with checksum {}", checksum);
            return None;
        };
        self.process_review_result(&path, &mut card, ReviewOutcome::Archive, now)
            .await;
        Some((path, card))
    }

    /// Dispose the watch and flush and close all history logs.
    pub fn shutdown(&self) {
        #[cfg(feature = "file-watcher")]
        self.stop_watching();
        self.history.close();
        log::info!("[recall.workspace] Shut down");
    }
}
