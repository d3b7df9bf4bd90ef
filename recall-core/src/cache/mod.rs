pub mod changes;
pub mod file_data;
pub mod matcher;

pub use changes::ChangeTracker;
pub use file_data::{FileDataCache, Reconfigured};
pub use matcher::PathMatcher;
