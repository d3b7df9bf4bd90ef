/// Per-file memoized parse results.
///
/// Manages the documents of all workspace roots with:
/// - Lazy slots: a path maps to unresolved (needs parsing) or resolved data
/// - Generation counters so a stale in-flight parse never overwrites a newer invalidation
/// - Lazily compiled include/exclude matcher, dropped with the cache when patterns change
/// - A change tracker bumped on every invalidation
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::future::join_all;
use walkdir::WalkDir;

use super::changes::ChangeTracker;
use super::matcher::PathMatcher;
use crate::config::{ParseConfig, RecallConfig};
use crate::parser;
use crate::types::FileData;

#[derive(Debug, Clone)]
struct Slot {
    generation: u64,
    data: Option<Arc<FileData>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Settings {
    roots: Vec<PathBuf>,
    include: Vec<String>,
    exclude: Vec<String>,
    parse: ParseConfig,
}

/// What a call to `FileDataCache::configure` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reconfigured {
    pub roots: bool,
    pub patterns: bool,
    pub parse: bool,
}

impl Reconfigured {
    /// Filesystem watches depend on the roots and the patterns.
    pub fn needs_rewatch(&self) -> bool {
        self.roots || self.patterns
    }

    pub fn any(&self) -> bool {
        self.roots || self.patterns || self.parse
    }
}

pub struct FileDataCache {
    /// path -> slot
    slots: RwLock<HashMap<PathBuf, Slot>>,
    settings: RwLock<Settings>,
    /// Built on first use from the include/exclude patterns
    matcher: RwLock<Option<Arc<PathMatcher>>>,
    /// Whether the workspace roots have been scanned for documents
    initialized: AtomicBool,
    next_generation: AtomicU64,
    changes: ChangeTracker,
}

impl FileDataCache {
    pub fn new(config: &RecallConfig, roots: Vec<PathBuf>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            settings: RwLock::new(Settings {
                roots: canonical_roots(roots),
                include: config.include.clone(),
                exclude: config.exclude.clone(),
                parse: config.parse_config(),
            }),
            matcher: RwLock::new(None),
            initialized: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
            changes: ChangeTracker::new(),
        }
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Apply new settings. Changing the roots or the patterns drops every slot;
    /// changing only the parse configuration marks them unresolved.
    pub fn configure(&self, config: &RecallConfig, roots: Vec<PathBuf>) -> Reconfigured {
        let next = Settings {
            roots: canonical_roots(roots),
            include: config.include.clone(),
            exclude: config.exclude.clone(),
            parse: config.parse_config(),
        };

        let mut settings = self.settings.write().unwrap();
        let changed = Reconfigured {
            roots: settings.roots != next.roots,
            patterns: settings.include != next.include || settings.exclude != next.exclude,
            parse: settings.parse != next.parse,
        };
        if !changed.any() {
            return changed;
        }
        *settings = next;
        drop(settings);

        if changed.patterns {
            *self.matcher.write().unwrap() = None;
        }

        let mut slots = self.slots.write().unwrap();
        if changed.needs_rewatch() {
            slots.clear();
            self.initialized.store(false, Ordering::Release);
        } else {
            for slot in slots.values_mut() {
                slot.generation = self.next_generation();
                slot.data = None;
            }
        }
        drop(slots);

        log::info!("[recall.cache.config] Reconfigured: {:?}", changed);
        self.changes.bump();
        changed
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.settings.read().unwrap().roots.clone()
    }

    pub fn changes(&self) -> &ChangeTracker {
        &self.changes
    }

    /// Shared compiled matcher, built once per pattern set.
    pub fn matcher(&self) -> Arc<PathMatcher> {
        if let Some(matcher) = self.matcher.read().unwrap().as_ref() {
            return matcher.clone();
        }

        let mut slot = self.matcher.write().unwrap();
        slot.get_or_insert_with(|| {
            let settings = self.settings.read().unwrap();
            Arc::new(PathMatcher::new(&settings.include, &settings.exclude))
        })
        .clone()
    }

    /// Workspace root containing `path` (the deepest one when roots nest).
    pub fn root_of(&self, path: &Path) -> Option<PathBuf> {
        self.settings
            .read()
            .unwrap()
            .roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.as_os_str().len())
            .cloned()
    }

    pub fn is_included(&self, path: &Path) -> bool {
        let root = self.root_of(path);
        let relative = root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        self.matcher().is_included(relative)
    }

    /// Paths currently known to the cache, resolved or not.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.slots.read().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Memoized parse result for a file, parsing from disk on first access.
    pub async fn get_file_data(&self, path: &Path) -> Arc<FileData> {
        let generation = {
            let mut slots = self.slots.write().unwrap();
            let slot = slots.entry(path.to_path_buf()).or_insert_with(|| Slot {
                generation: self.next_generation(),
                data: None,
            });
            if let Some(data) = &slot.data {
                return data.clone();
            }
            slot.generation
        };

        let data = Arc::new(self.load(path).await);
        self.store(path, generation, data.clone());
        data
    }

    /// All known files, resolving any unresolved slots concurrently.
    pub async fn get_files_data(&self) -> BTreeMap<PathBuf, Arc<FileData>> {
        self.get_files_data_filtered(|_| true).await
    }

    pub async fn get_files_data_filtered<F>(&self, filter: F) -> BTreeMap<PathBuf, Arc<FileData>>
    where
        F: Fn(&Path) -> bool,
    {
        if !self.initialized.load(Ordering::Acquire) {
            self.init_files_data().await;
        }

        let (mut result, pending) = {
            let slots = self.slots.read().unwrap();
            let mut resolved = BTreeMap::new();
            let mut pending = Vec::new();
            for (path, slot) in slots.iter().filter(|(path, _)| filter(path)) {
                match &slot.data {
                    Some(data) => {
                        resolved.insert(path.clone(), data.clone());
                    }
                    None => pending.push(path.clone()),
                }
            }
            (resolved, pending)
        };

        let loaded = join_all(pending.into_iter().map(|path| async move {
            let data = self.get_file_data(&path).await;
            (path, data)
        }))
        .await;
        result.extend(loaded);
        result
    }

    /// Drop or replace the cached data for a file.
    ///
    /// `None` clears the slot so the next access reparses from disk. `Some(text)`
    /// reparses immediately from the given text; an empty string models deletion.
    pub fn invalidate_file_data(&self, path: &Path, content: Option<&str>) -> Option<Arc<FileData>> {
        let data = content.map(|text| {
            let config = self.settings.read().unwrap().parse.clone();
            Arc::new(parser::parse(text, &config).with_source(path.to_path_buf(), self.root_of(path)))
        });

        let slot = Slot {
            generation: self.next_generation(),
            data: data.clone(),
        };
        self.slots.write().unwrap().insert(path.to_path_buf(), slot);
        self.changes.bump();
        data
    }

    /// Start tracking a newly created file. No-op for excluded or known paths.
    pub fn track_file(&self, path: &Path) -> bool {
        if !self.initialized.load(Ordering::Acquire) || !self.is_included(path) {
            return false;
        }

        let mut slots = self.slots.write().unwrap();
        if slots.contains_key(path) {
            return false;
        }
        slots.insert(
            path.to_path_buf(),
            Slot {
                generation: self.next_generation(),
                data: None,
            },
        );
        drop(slots);

        self.changes.bump();
        true
    }

    /// Stop tracking a deleted file.
    pub fn forget_file(&self, path: &Path) -> bool {
        let removed = self.slots.write().unwrap().remove(path).is_some();
        if removed {
            self.changes.bump();
        }
        removed
    }

    /// Read and parse a file. Unreadable files degrade to an empty card list.
    async fn load(&self, path: &Path) -> FileData {
        let config = self.settings.read().unwrap().parse.clone();
        let data = match tokio::fs::read_to_string(path).await {
            Ok(content) => parser::parse(&content, &config),
            Err(e) => {
                log::warn!("[recall.cache.read] Failed to read {:?}: {}", path, e);
                FileData::empty(config)
            }
        };
        data.with_source(path.to_path_buf(), self.root_of(path))
    }

    /// Store a parse result unless the slot was invalidated or removed meanwhile.
    fn store(&self, path: &Path, generation: u64, data: Arc<FileData>) -> bool {
        let mut slots = self.slots.write().unwrap();
        match slots.get_mut(path) {
            Some(slot) if slot.generation == generation => {
                slot.data = Some(data);
                true
            }
            _ => {
                log::debug!("[recall.cache.stale] Discarding outdated parse of {:?}", path);
                false
            }
        }
    }

    /// Seed unresolved slots for every included file under the roots.
    async fn init_files_data(&self) {
        let roots = self.roots();
        let matcher = self.matcher();

        let found = match tokio::task::spawn_blocking(move || discover_files(&roots, &matcher)).await {
            Ok(found) => found,
            Err(e) => {
                log::error!("[recall.cache.scan] File discovery failed: {}", e);
                Vec::new()
            }
        };

        let mut slots = self.slots.write().unwrap();
        for path in found {
            slots.entry(path).or_insert_with(|| Slot {
                generation: self.next_generation(),
                data: None,
            });
        }
        self.initialized.store(true, Ordering::Release);
    }
}

fn canonical_roots(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = roots
        .into_iter()
        .map(|root| std::fs::canonicalize(&root).unwrap_or(root))
        .collect();
    roots.sort();
    roots.dedup();
    roots
}

fn discover_files(roots: &[PathBuf], matcher: &PathMatcher) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("[recall.cache.scan] Skipping entry under {:?}: {}", root, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if matcher.is_included(relative) {
                found.push(entry.into_path());
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DECK: &str = "# Question one\n\nAnswer one\n\n# Question two\n\nAnswer two\n";

    fn workspace() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn test_get_file_data_parses_and_memoizes() {
        let (_dir, root) = workspace();
        let path = root.join("deck.md");
        fs::write(&path, DECK).unwrap();

        let cache = FileDataCache::new(&RecallConfig::default(), vec![root.clone()]);
        let first = cache.get_file_data(&path).await;
        assert_eq!(first.cards.len(), 2);
        assert_eq!(first.path, path);
        assert_eq!(first.root.as_deref(), Some(root.as_path()));

        // Memoized: disk changes are not seen until invalidation
        fs::write(&path, "# Only\n\nOne card\n").unwrap();
        let second = cache.get_file_data(&path).await;
        assert!(Arc::ptr_eq(&first, &second));

        let version = cache.changes().version();
        assert!(cache.invalidate_file_data(&path, None).is_none());
        assert!(cache.changes().changed_since(version));

        let third = cache.get_file_data(&path).await;
        assert_eq!(third.cards.len(), 1);
    }

    #[tokio::test]
    async fn test_eager_invalidation() {
        let (_dir, root) = workspace();
        let path = root.join("deck.md");
        fs::write(&path, DECK).unwrap();

        let cache = FileDataCache::new(&RecallConfig::default(), vec![root.clone()]);
        assert_eq!(cache.get_file_data(&path).await.cards.len(), 2);

        let edited = cache
            .invalidate_file_data(&path, Some("# Edited\n\nin the editor\n"))
            .unwrap();
        assert_eq!(edited.cards.len(), 1);
        assert_eq!(cache.get_file_data(&path).await.cards[0].pages[0], "# Edited");

        let deleted = cache.invalidate_file_data(&path, Some("")).unwrap();
        assert!(deleted.cards.is_empty());
        assert!(cache.get_file_data(&path).await.cards.is_empty());
    }

    #[tokio::test]
    async fn test_get_files_data_scans_roots() {
        let (_a, root_a) = workspace();
        let (_b, root_b) = workspace();
        fs::write(root_a.join("one.md"), DECK).unwrap();
        fs::create_dir_all(root_a.join("sub")).unwrap();
        fs::write(root_a.join("sub/two.md"), "# Q\n\nA\n").unwrap();
        fs::write(root_a.join("notes.txt"), DECK).unwrap();
        fs::create_dir_all(root_a.join("node_modules/pkg")).unwrap();
        fs::write(root_a.join("node_modules/pkg/README.md"), DECK).unwrap();
        fs::write(root_b.join("three.md"), "no cards here").unwrap();
        // Not valid UTF-8: degrades to an empty card list
        fs::write(root_b.join("broken.md"), [0xff, 0xfe, 0x00]).unwrap();

        let cache = FileDataCache::new(
            &RecallConfig::default(),
            vec![root_a.clone(), root_b.clone()],
        );
        let files = cache.get_files_data().await;

        assert_eq!(files.len(), 4);
        assert_eq!(files[&root_a.join("one.md")].cards.len(), 2);
        assert_eq!(files[&root_a.join("sub/two.md")].cards.len(), 1);
        assert!(files[&root_b.join("three.md")].cards.is_empty());
        assert!(files[&root_b.join("broken.md")].cards.is_empty());
        assert_eq!(
            files[&root_b.join("three.md")].root.as_deref(),
            Some(root_b.as_path())
        );

        let only_a = cache
            .get_files_data_filtered(|path| path.starts_with(&root_a))
            .await;
        assert_eq!(only_a.len(), 2);
    }

    #[tokio::test]
    async fn test_configure_drops_cache_on_pattern_change() {
        let (_dir, root) = workspace();
        fs::write(root.join("deck.md"), DECK).unwrap();
        fs::write(root.join("deck.txt"), DECK).unwrap();

        let mut config = RecallConfig::default();
        let cache = FileDataCache::new(&config, vec![root.clone()]);
        assert_eq!(cache.get_files_data().await.len(), 1);

        assert!(!cache.configure(&config, vec![root.clone()]).any());

        config.include = vec!["**/*.txt".to_string()];
        let changed = cache.configure(&config, vec![root.clone()]);
        assert!(changed.patterns && changed.needs_rewatch());
        assert!(cache.tracked_paths().is_empty());

        let files = cache.get_files_data().await;
        assert_eq!(files.keys().cloned().collect::<Vec<_>>(), vec![root.join("deck.txt")]);
    }

    #[tokio::test]
    async fn test_parse_config_change_reparses() {
        let (_dir, root) = workspace();
        let path = root.join("deck.md");
        fs::write(&path, "- Term: Definition\n").unwrap();

        let mut config = RecallConfig::default();
        let cache = FileDataCache::new(&config, vec![root.clone()]);
        assert!(cache.get_file_data(&path).await.cards.is_empty());

        config.default_level = crate::config::CardLevel::Bullet;
        let changed = cache.configure(&config, vec![root.clone()]);
        assert!(changed.parse && !changed.needs_rewatch());
        assert_eq!(cache.tracked_paths(), vec![path.clone()]);
        assert_eq!(cache.get_file_data(&path).await.cards.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_parse_is_discarded() {
        let (_dir, root) = workspace();
        let path = root.join("deck.md");
        fs::write(&path, DECK).unwrap();

        let cache = FileDataCache::new(&RecallConfig::default(), vec![root.clone()]);
        let stale = Arc::new(cache.load(&path).await);
        let old_generation = {
            let mut slots = cache.slots.write().unwrap();
            let generation = cache.next_generation();
            slots.insert(path.clone(), Slot { generation, data: None });
            generation
        };

        // Invalidation lands while the parse is "in flight"
        cache.invalidate_file_data(&path, Some(""));
        assert!(!cache.store(&path, old_generation, stale));
        assert!(cache.get_file_data(&path).await.cards.is_empty());
    }

    #[tokio::test]
    async fn test_track_and_forget() {
        let (_dir, root) = workspace();
        fs::write(root.join("deck.md"), DECK).unwrap();

        let cache = FileDataCache::new(&RecallConfig::default(), vec![root.clone()]);
        assert!(!cache.track_file(&root.join("new.md")));

        cache.get_files_data().await;
        let new_file = root.join("new.md");
        fs::write(&new_file, "# New\n\ncard\n").unwrap();
        assert!(cache.track_file(&new_file));
        assert!(!cache.track_file(&new_file));
        assert!(!cache.track_file(&root.join("image.png")));
        assert_eq!(cache.get_files_data().await.len(), 2);

        assert!(cache.forget_file(&new_file));
        assert!(!cache.forget_file(&new_file));
        assert_eq!(cache.get_files_data().await.len(), 1);
    }
}
