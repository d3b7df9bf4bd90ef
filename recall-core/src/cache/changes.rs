/// Coalesced change notification for the file data cache.
///
/// Every invalidation bumps a monotonic version immediately. Consumers poll
/// `changed_since` on their own schedule, or await `settled`, which resolves
/// once no further bump has arrived for DEBOUNCE_DURATION.
use std::time::Duration;

use tokio::sync::watch;

pub const DEBOUNCE_DURATION: Duration = Duration::from_millis(250);

pub struct ChangeTracker {
    tx: watch::Sender<u64>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Record a change. Returns the new version.
    pub fn bump(&self) -> u64 {
        let mut version = 0;
        self.tx.send_modify(|v| {
            *v += 1;
            version = *v;
        });
        version
    }

    pub fn version(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn changed_since(&self, version: u64) -> bool {
        self.version() > version
    }

    /// Wait until the version moves past `since` and then stays quiet for the
    /// debounce window. Returns the version at that point.
    pub async fn settled(&self, since: u64) -> u64 {
        let mut rx = self.tx.subscribe();

        loop {
            let current = *rx.borrow_and_update();
            if current > since {
                break;
            }
            if rx.changed().await.is_err() {
                return self.version();
            }
        }

        loop {
            match tokio::time::timeout(DEBOUNCE_DURATION, rx.changed()).await {
                Ok(Ok(())) => {
                    rx.borrow_and_update();
                }
                Ok(Err(_)) | Err(_) => return *rx.borrow(),
            }
        }
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}
