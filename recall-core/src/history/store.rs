/// Review history per workspace root.
///
/// Each root gets one index, loaded once from its dated logs and shared by all
/// callers, plus a lazily opened append sink. Writes never fail the caller:
/// errors are logged and the review continues without persistence.
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::OnceCell;

use super::logfile::{self, LogSink};
use super::{HistoryError, HISTORY_DIR};
use crate::identity;
use crate::scheduler;
use crate::types::{day_start, days_to_ms, Card, HistoryEntry};

/// Entries grouped by checksum, in log order.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    entries: HashMap<String, Vec<HistoryEntry>>,
    /// prevChecksum -> checksums that were chained onto it
    successors: HashMap<String, Vec<String>>,
}

impl HistoryIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    pub fn insert(&mut self, entry: HistoryEntry) {
        if let Some(prev) = &entry.prev_checksum {
            let successors = self.successors.entry(prev.clone()).or_default();
            if !successors.contains(&entry.checksum) {
                successors.push(entry.checksum.clone());
            }
        }
        self.entries
            .entry(entry.checksum.clone())
            .or_default()
            .push(entry);
    }

    pub fn lookup(&self, checksum: &str) -> &[HistoryEntry] {
        self.entries.get(checksum).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct checksums with history.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry connected to `checksum` through prevChecksum links, in
    /// either direction.
    pub fn linked_entries(&self, checksum: &str) -> Vec<&HistoryEntry> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([checksum.to_string()]);
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for entry in self.lookup(&current) {
                if let Some(prev) = &entry.prev_checksum {
                    queue.push_back(prev.clone());
                }
                result.push(entry);
            }
            if let Some(next) = self.successors.get(&current) {
                queue.extend(next.iter().cloned());
            }
        }
        result
    }

    /// Annotate a card from its history.
    ///
    /// Walks the entries of all known checksums, following prevChecksum links
    /// (which are added to the card's checksum set), and keeps the entry with
    /// the latest projected review date. Cards without usable history are left
    /// untouched.
    pub fn replay(&self, card: &mut Card) {
        let jitter = identity::jitter_ms(card.checksum());
        let mut best: Option<(i64, &HistoryEntry)> = None;
        let mut visited: Vec<String> = Vec::new();
        let mut queue: VecDeque<String> = card.checksums.iter().cloned().collect();

        while let Some(checksum) = queue.pop_front() {
            if visited.contains(&checksum) {
                continue;
            }
            for entry in self.lookup(&checksum) {
                if let Some(prev) = &entry.prev_checksum {
                    queue.push_back(prev.clone());
                }
                if !entry.recall.is_finite() || entry.recall < 0.0 {
                    continue;
                }
                let candidate = entry
                    .timestamp
                    .saturating_add(days_to_ms(entry.recall))
                    .saturating_add(jitter);
                if best.map_or(true, |(date, _)| candidate > date) {
                    best = Some((candidate, entry));
                }
            }
            visited.push(checksum);
        }

        for checksum in &visited {
            card.link_checksum(checksum);
        }

        if let Some((next_review_date, entry)) = best {
            card.recall = entry.recall;
            card.success = entry.success;
            card.last_review_date = Some(entry.timestamp);
            card.next_review_date = next_review_date;
            scheduler::refresh_state(card);
        }
    }
}

struct RootHistory {
    log_dir: PathBuf,
    index: OnceCell<RwLock<HistoryIndex>>,
    sink: Mutex<Option<LogSink>>,
}

impl RootHistory {
    fn new(root: &Path) -> Self {
        Self {
            log_dir: root.join(HISTORY_DIR),
            index: OnceCell::new(),
            sink: Mutex::new(None),
        }
    }

    /// The loaded index. Concurrent first callers share one load.
    async fn index(&self) -> &RwLock<HistoryIndex> {
        self.index
            .get_or_init(|| async {
                let dir = self.log_dir.clone();
                let entries = match tokio::task::spawn_blocking(move || logfile::load_dir(&dir)).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        log::error!("[recall.history.load] Loading {:?} failed: {}", self.log_dir, e);
                        Vec::new()
                    }
                };
                let index = HistoryIndex::from_entries(entries);
                log::info!(
                    "[recall.history.load] {} cards with history in {:?}",
                    index.len(),
                    self.log_dir
                );
                RwLock::new(index)
            })
            .await
    }

    /// Append to today's log, rolling the sink over when the date changes.
    fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let today = Utc::now().date_naive();
        let mut sink = self.sink.lock().unwrap();

        if sink.as_ref().map_or(true, |s| s.date() != today) {
            *sink = Some(LogSink::open(&self.log_dir, today)?);
        }
        if let Some(sink) = sink.as_mut() {
            sink.append(entry)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), HistoryError> {
        match self.sink.lock().unwrap().as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

/// Review histories of all workspace roots.
#[derive(Default)]
pub struct HistoryStore {
    roots: Mutex<HashMap<PathBuf, Arc<RootHistory>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root and load its logs. Idempotent.
    pub async fn add_folder(&self, root: &Path) {
        self.register(root).index().await;
    }

    /// Register a root without loading it. The first caller to need the index
    /// triggers the load.
    fn register(&self, root: &Path) -> Arc<RootHistory> {
        self.roots
            .lock()
            .unwrap()
            .entry(root.to_path_buf())
            .or_insert_with(|| {
                log::info!("[recall.history.root] Setting up history for {:?}", root);
                Arc::new(RootHistory::new(root))
            })
            .clone()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.roots.lock().unwrap().keys().cloned().collect();
        roots.sort();
        roots
    }

    fn root(&self, root: &Path) -> Result<Arc<RootHistory>, HistoryError> {
        self.roots
            .lock()
            .unwrap()
            .get(root)
            .cloned()
            .ok_or_else(|| HistoryError::RootNotInitialized(root.to_path_buf()))
    }

    /// Replay the history of `root` onto a card.
    pub async fn get_card_recall(&self, root: &Path, card: &mut Card) {
        let history = match self.root(root) {
            Ok(history) => history,
            Err(e) => {
                log::warn!("[recall.history.replay] {}", e);
                return;
            }
        };
        history.index().await.read().unwrap().replay(card);
    }

    /// Replay onto many cards of the same root under a single lock.
    pub async fn get_cards_recall<'a>(&self, root: &Path, cards: impl IntoIterator<Item = &'a mut Card>) {
        let history = match self.root(root) {
            Ok(history) => history,
            Err(e) => {
                log::warn!("[recall.history.replay] {}", e);
                return;
            }
        };
        let index = history.index().await.read().unwrap();
        for card in cards {
            index.replay(card);
        }
    }

    /// Record a review of `card`.
    ///
    /// Cards that were never reviewed (`recall == 0`) are not logged. The entry
    /// is timestamped with `prev_timestamp`, else the card's last review date,
    /// else the start of the current day.
    pub async fn log_card_recall(
        &self,
        root: &Path,
        card: &Card,
        prev_timestamp: Option<i64>,
        prev_checksum: Option<&str>,
    ) {
        if card.recall == 0.0 {
            return;
        }
        let history = match self.root(root) {
            Ok(history) => history,
            Err(e) => {
                log::warn!("[recall.history.write] {}", e);
                return;
            }
        };

        let entry = HistoryEntry {
            checksum: card.checksum().to_string(),
            timestamp: prev_timestamp
                .or(card.last_review_date)
                .unwrap_or_else(|| day_start(Utc::now().timestamp_millis())),
            success: card.success,
            recall: card.recall,
            prev_checksum: prev_checksum.map(str::to_string),
        };

        history.index().await.write().unwrap().insert(entry.clone());
        if let Err(e) = history.append(&entry) {
            log::error!(
                "[recall.history.write] Failed to log {} under {:?}: {}",
                entry.checksum,
                root,
                e
            );
        }
    }

    /// History reachable from `checksum` in either chain direction.
    pub async fn linked_entries(&self, root: &Path, checksum: &str) -> Vec<HistoryEntry> {
        match self.root(root) {
            Ok(history) => history
                .index()
                .await
                .read()
                .unwrap()
                .linked_entries(checksum)
                .into_iter()
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn flush(&self) {
        let roots: Vec<(PathBuf, Arc<RootHistory>)> = self
            .roots
            .lock()
            .unwrap()
            .iter()
            .map(|(root, history)| (root.clone(), history.clone()))
            .collect();
        for (root, history) in roots {
            if let Err(e) = history.flush() {
                log::error!("[recall.history.flush] Failed to flush {:?}: {}", root, e);
            }
        }
    }

    /// Flush and release every open sink. Later writes reopen them.
    pub fn close(&self) {
        self.flush();
        for history in self.roots.lock().unwrap().values() {
            if let Some(sink) = history.sink.lock().unwrap().take() {
                log::debug!("[recall.history.sink] Closed {:?}", sink.path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseConfig;
    use crate::parser;
    use crate::types::{CardState, ReviewOutcome, DAY_MS};
    use std::fs;

    const T0: i64 = 1_704_153_600_000;

    fn card(content: &str) -> Card {
        parser::parse(content, &ParseConfig::default()).cards.remove(0)
    }

    fn reviewed(mut card: Card, recall: f64, outcome: ReviewOutcome, at: i64) -> Card {
        card.recall = recall;
        card.success = Some(outcome);
        card.last_review_date = Some(at);
        card
    }

    #[tokio::test]
    async fn test_empty_root_leaves_card_new() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new();
        store.add_folder(dir.path()).await;
        store.add_folder(dir.path()).await;
        assert_eq!(store.roots(), vec![dir.path().to_path_buf()]);

        let mut c = card("# Q\n\nA");
        let before = c.clone();
        store.get_card_recall(dir.path(), &mut c).await;
        assert_eq!(c, before);
        assert!(!dir.path().join(HISTORY_DIR).exists());
    }

    #[tokio::test]
    async fn test_logged_review_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new();
        store.add_folder(dir.path()).await;

        let c = reviewed(card("# Q\n\nA"), 4.0, ReviewOutcome::Success, T0);
        store.log_card_recall(dir.path(), &c, None, None).await;
        store.close();

        let reloaded = HistoryStore::new();
        reloaded.add_folder(dir.path()).await;
        let mut fresh = card("# Q\n\nA");
        reloaded.get_card_recall(dir.path(), &mut fresh).await;

        assert_eq!(fresh.recall, 4.0);
        assert_eq!(fresh.success, Some(ReviewOutcome::Success));
        assert_eq!(fresh.state, CardState::Good);
        assert_eq!(fresh.last_review_date, Some(T0));
        assert_eq!(
            fresh.next_review_date,
            T0 + 4 * DAY_MS + identity::jitter_ms(fresh.checksum())
        );
    }

    #[tokio::test]
    async fn test_latest_projection_wins() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join(HISTORY_DIR);
        fs::create_dir_all(&log_dir).unwrap();

        let c = card("# Q\n\nA");
        let rows = format!(
            "{cs},2,8,,{t0}\n{cs},0,1,,{t1}\n{cs},2,bad,,{t2}\n",
            cs = c.checksum(),
            t0 = T0,
            t1 = T0 + DAY_MS,
            t2 = T0 + 30 * DAY_MS,
        );
        fs::write(log_dir.join("recall-2024-01-02.csv"), rows).unwrap();

        let store = HistoryStore::new();
        store.add_folder(dir.path()).await;
        let mut c = c;
        store.get_card_recall(dir.path(), &mut c).await;

        // T0 + 8 days projects later than T0 + 1 day + 1 day
        assert_eq!(c.recall, 8.0);
        assert_eq!(c.last_review_date, Some(T0));
    }

    #[tokio::test]
    async fn test_stripped_checksum_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join(HISTORY_DIR);
        fs::create_dir_all(&log_dir).unwrap();

        let c = card("# Q\n\nA");
        fs::write(
            log_dir.join("recall-2024-01-02.csv"),
            format!("{},1,2\n", c.checksums[1]),
        )
        .unwrap();

        let store = HistoryStore::new();
        store.add_folder(dir.path()).await;
        let mut c = c;
        store.get_card_recall(dir.path(), &mut c).await;
        assert_eq!(c.recall, 2.0);
        assert_eq!(c.state, CardState::Hard);
        assert_eq!(c.last_review_date, Some(T0));
    }

    #[tokio::test]
    async fn test_daisychain_link_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new();
        store.add_folder(dir.path()).await;

        let original = reviewed(card("# Q\n\nA"), 4.0, ReviewOutcome::Success, T0);
        store.log_card_recall(dir.path(), &original, None, None).await;

        let edited = reviewed(card("# Q\n\nA, edited"), 4.0, ReviewOutcome::Success, T0);
        store
            .log_card_recall(dir.path(), &edited, original.last_review_date, Some(original.checksum()))
            .await;
        store.close();

        let reloaded = HistoryStore::new();
        reloaded.add_folder(dir.path()).await;

        let mut fresh = card("# Q\n\nA, edited");
        reloaded.get_card_recall(dir.path(), &mut fresh).await;
        assert_eq!(fresh.recall, 4.0);
        assert!(fresh.has_checksum(original.checksum()));
        assert_eq!(fresh.checksums.len(), 3);

        let from_new = reloaded.linked_entries(dir.path(), edited.checksum()).await;
        let from_old = reloaded.linked_entries(dir.path(), original.checksum()).await;
        assert_eq!(from_new.len(), 2);
        assert_eq!(from_old.len(), 2);
        assert!(from_old
            .iter()
            .any(|e| e.checksum == edited.checksum()
                && e.prev_checksum.as_deref() == Some(original.checksum())));
    }

    #[tokio::test]
    async fn test_unreviewed_and_uninitialized_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new();

        let c = reviewed(card("# Q\n\nA"), 2.0, ReviewOutcome::Success, T0);
        store.log_card_recall(dir.path(), &c, None, None).await;

        store.add_folder(dir.path()).await;
        store.log_card_recall(dir.path(), &card("# Q\n\nA"), None, None).await;
        assert!(!dir.path().join(HISTORY_DIR).exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the log directory should be
        fs::write(dir.path().join(HISTORY_DIR), "not a directory").unwrap();

        let store = HistoryStore::new();
        store.add_folder(dir.path()).await;

        let c = reviewed(card("# Q\n\nA"), 2.0, ReviewOutcome::Success, T0);
        store.log_card_recall(dir.path(), &c, None, None).await;

        // Still visible for the rest of the session
        let mut fresh = card("# Q\n\nA");
        store.get_card_recall(dir.path(), &mut fresh).await;
        assert_eq!(fresh.recall, 2.0);
        store.close();
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join(HISTORY_DIR);
        fs::create_dir_all(&log_dir).unwrap();

        let store = HistoryStore::new();
        let history = store.register(dir.path());
        assert!(Arc::ptr_eq(&history, &store.register(dir.path())));
        assert!(!history.index.initialized());

        // Written after registration, before anyone needs the index
        let c = card("# Q\n\nA");
        fs::write(
            log_dir.join("recall-2024-01-02.csv"),
            format!("{},2,4,,{}\n", c.checksum(), T0),
        )
        .unwrap();

        let (mut a, mut b) = (c.clone(), c.clone());
        let (first, second) = tokio::join!(
            async {
                store.get_card_recall(dir.path(), &mut a).await;
                history.index().await as *const RwLock<HistoryIndex>
            },
            async {
                store.get_card_recall(dir.path(), &mut b).await;
                history.index().await as *const RwLock<HistoryIndex>
            }
        );
        assert!(std::ptr::eq(first, second));
        assert!(history.index.initialized());
        assert_eq!(a.recall, 4.0);
        assert_eq!(b, a);

        // Rows appearing after the load are not picked up again
        fs::write(
            log_dir.join("recall-2024-01-03.csv"),
            format!("{},2,16,,{}\n", c.checksum(), T0 + DAY_MS),
        )
        .unwrap();
        store.add_folder(dir.path()).await;
        let mut later = c.clone();
        store.get_card_recall(dir.path(), &mut later).await;
        assert_eq!(later.recall, 4.0);
        assert_eq!(store.roots().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_rows_do_not_break_replay() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join(HISTORY_DIR);
        fs::create_dir_all(&log_dir).unwrap();

        let c = card("# Q\n\nA");
        fs::write(
            log_dir.join("recall-2024-01-02.csv"),
            format!("{cs},2,1e300\n{cs},2,4,,9223372036854775000\n", cs = c.checksum()),
        )
        .unwrap();

        let store = HistoryStore::new();
        store.add_folder(dir.path()).await;
        let mut c = c;
        store.get_card_recall(dir.path(), &mut c).await;

        // The huge recall is unusable, the huge timestamp falls back to the file date
        assert_eq!(c.recall, 4.0);
        assert_eq!(c.last_review_date, Some(T0));
        assert_eq!(c.next_review_date, T0 + 4 * DAY_MS + identity::jitter_ms(c.checksum()));
    }

    #[test]
    fn test_replay_saturates_far_future_dates() {
        let mut c = card("# Q\n\nA");
        let index = HistoryIndex::from_entries([HistoryEntry {
            checksum: c.checksum().to_string(),
            timestamp: i64::MAX - 10,
            success: Some(ReviewOutcome::Success),
            recall: 4.0,
            prev_checksum: None,
        }]);
        index.replay(&mut c);
        assert_eq!(c.next_review_date, i64::MAX);
        assert_eq!(c.state, CardState::Good);
    }
}
