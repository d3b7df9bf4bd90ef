/// Include/exclude glob matching for workspace documents.
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled include/exclude pattern sets. Paths are matched relative to
/// their workspace root.
#[derive(Debug)]
pub struct PathMatcher {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathMatcher {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: build_set(include),
            exclude: build_set(exclude),
        }
    }

    pub fn is_included(&self, relative: &Path) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }
}

/// Invalid patterns are skipped so one typo does not hide every document.
fn build_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => log::warn!("[recall.cache.glob] Ignoring pattern {:?}: {}", pattern, e),
        }
    }
    builder.build().unwrap_or_else(|e| {
        log::warn!("[recall.cache.glob] Failed to build glob set: {}", e);
        GlobSet::empty()
    })
}
