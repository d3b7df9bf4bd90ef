/// File watcher using notify.
///
/// Watches every workspace root recursively and feeds events straight into the
/// file data cache. Slot invalidation is immediate; coalescing of the resulting
/// change notifications happens in `ChangeTracker::settled`.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::cache::FileDataCache;

/// What a filesystem event means for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Created,
    Modified,
    Removed,
}

/// Recursive watch over the workspace roots.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl FileWatcher {
    pub fn new(cache: Arc<FileDataCache>) -> Result<Self, notify::Error> {
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => apply_event(&cache, &event),
                Err(e) => log::error!("[recall.watcher.error] Watch error: {}", e),
            }
        })?;

        Ok(Self {
            watcher,
            roots: Vec::new(),
        })
    }

    /// Start watching a workspace root and everything below it.
    pub fn watch_root(&mut self, root: &Path) -> Result<(), notify::Error> {
        if self.roots.iter().any(|r| r == root) {
            return Ok(());
        }
        self.watcher.watch(root, RecursiveMode::Recursive)?;
        self.roots.push(root.to_path_buf());
        log::info!("[recall.watcher.root] Watching {:?}", root);
        Ok(())
    }

    pub fn watched_roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

pub fn classify(kind: &EventKind) -> Option<FileChange> {
    match kind {
        EventKind::Create(_) => Some(FileChange::Created),
        EventKind::Remove(_) => Some(FileChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FileChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileChange::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(FileChange::Modified),
        _ => None,
    }
}

/// Apply one notify event to the cache.
pub fn apply_event(cache: &FileDataCache, event: &Event) {
    // Rename with both ends known: paths are [from, to]
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        if let [from, to] = event.paths.as_slice() {
            apply_change(cache, from, FileChange::Removed);
            apply_change(cache, to, FileChange::Created);
        }
        return;
    }

    let Some(change) = classify(&event.kind) else {
        return;
    };
    for path in &event.paths {
        apply_change(cache, path, change);
    }
}

fn apply_change(cache: &FileDataCache, path: &Path, change: FileChange) {
    match change {
        FileChange::Removed => {
            if cache.forget_file(path) {
                log::debug!("[recall.watcher.remove] {:?}", path);
            }
        }
        FileChange::Created | FileChange::Modified => {
            if !cache.is_included(path) {
                return;
            }
            // Created over an existing path (atomic save) counts as a modification
            if change == FileChange::Modified || !cache.track_file(path) {
                cache.invalidate_file_data(path, None);
            }
            log::debug!("[recall.watcher.change] {:?} {:?}", change, path);
        }
    }
}
