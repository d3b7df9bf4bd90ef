//! Spaced-repetition flashcards extracted from markdown documents.
//!
//! Documents are parsed into checksum-identified cards (`parser`), memoized
//! per file (`cache`), annotated from per-root review logs (`history`) and
//! scheduled (`scheduler`). `Workspace` wires the pieces together.

pub mod cache;
pub mod config;
pub mod history;
pub mod identity;
pub mod parser;
pub mod scheduler;
pub mod types;
#[cfg(feature = "file-watcher")]
pub mod watcher;
pub mod workspace;

pub use config::{CardLevel, ParseConfig, RecallConfig};
pub use types::{Badge, Card, CardState, FileData, HistoryEntry, ReviewOutcome};
pub use workspace::Workspace;
