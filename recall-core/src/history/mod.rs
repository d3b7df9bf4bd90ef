pub mod logfile;
pub mod store;

use std::path::PathBuf;

pub use store::{HistoryIndex, HistoryStore};

/// Name of the per-root directory holding the review logs.
pub const HISTORY_DIR: &str = ".recall";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("History root not initialized: {0}")]
    RootNotInitialized(PathBuf),
}
