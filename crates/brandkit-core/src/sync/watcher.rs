use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::store::CredentialStore;
use crate::subscription::Subscription;

/// Picks up session changes written to the backend by other processes.
///
/// Polls the backend and reloads the store when the persisted session
/// differs from the in-memory one; the store's listeners then rearm or
/// disarm the local scheduler exactly as for an in-process change event.
pub struct StorageWatcher {
    store: Weak<CredentialStore>,
    interval: Duration,
}

impl StorageWatcher {
    pub fn new(store: &Arc<CredentialStore>, interval: Duration) -> Self {
        Self {
            store: Arc::downgrade(store),
            interval,
        }
    }

    /// Check the backend once. Returns `true` if the store changed.
    pub fn poll_once(&self) -> bool {
        let Some(store) = self.store.upgrade() else {
            return false;
        };
        let changed = store.reload();
        if changed {
            info!(
                signed_in = store.get().is_some(),
                "Session changed by another process"
            );
        }
        changed
    }

    /// Poll on a background task until the subscription is dropped or the
    /// store goes away.
    pub fn spawn(self) -> Subscription {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; the store was just loaded
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if self.store.strong_count() == 0 {
                    debug!("Store dropped; stopping storage watcher");
                    break;
                }
                self.poll_once();
            }
        });
        let abort = task.abort_handle();
        Subscription::new(move || abort.abort())
    }
}
