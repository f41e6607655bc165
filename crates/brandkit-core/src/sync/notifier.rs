//! "The session changed" broadcast between execution contexts.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::subscription::Subscription;

/// Default channel capacity for change events.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Identifies one execution context (one `AuthManager`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Updated { expires_at: DateTime<Utc> },
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub origin: ContextId,
    pub kind: ChangeKind,
}

/// Shared in-process channel that contexts publish session changes on.
///
/// Contexts on the same bus must also share a `SessionBackend`; the event
/// only says that something changed, the backend holds what.
#[derive(Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One context's handle on a [`ChangeBus`].
///
/// Delivery is best-effort and at-least-once; handlers must be idempotent.
pub struct ChangeNotifier {
    id: ContextId,
    bus: ChangeBus,
}

impl ChangeNotifier {
    pub fn new(bus: &ChangeBus) -> Self {
        Self {
            id: ContextId::random(),
            bus: bus.clone(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.id
    }

    /// Publish a change to the other contexts.
    ///
    /// Returns the number of receivers the event was queued for; 0 when no
    /// one is listening.
    pub fn broadcast(&self, kind: ChangeKind) -> usize {
        debug!(origin = %self.id, kind = ?kind, "Broadcasting session change");
        self.bus
            .sender
            .send(ChangeEvent {
                origin: self.id,
                kind,
            })
            .unwrap_or(0)
    }

    /// Run `handler` for every change published by *other* contexts.
    ///
    /// Must be called from within a Tokio runtime. The handler task stops
    /// when the returned subscription is dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let mut receiver = self.bus.sender.subscribe();
        let own_id = self.id;

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.origin == own_id => {}
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(context = %own_id, skipped, "Change listener lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let abort = task.abort_handle();
        Subscription::new(move || abort.abort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_events_reach_other_contexts_only() {
        let bus = ChangeBus::new();
        let a = ChangeNotifier::new(&bus);
        let b = ChangeNotifier::new(&bus);

        let seen_by_a = Arc::new(Mutex::new(Vec::new()));
        let seen_by_b = Arc::new(Mutex::new(Vec::new()));

        let log = seen_by_a.clone();
        let _sub_a = a.subscribe(move |event| log.lock().push(event));
        let log = seen_by_b.clone();
        let _sub_b = b.subscribe(move |event| log.lock().push(event));

        assert_eq!(a.broadcast(ChangeKind::Cleared), 2);
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen_by_b.lock().is_empty() {
                settle().await;
            }
        })
        .await
        .expect("event should reach context b");

        assert!(seen_by_a.lock().is_empty());
        let events = seen_by_b.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, a.context_id());
        assert_eq!(events[0].kind, ChangeKind::Cleared);
    }

    #[tokio::test]
    async fn test_dropping_subscription_stops_handler() {
        let bus = ChangeBus::new();
        let a = ChangeNotifier::new(&bus);
        let b = ChangeNotifier::new(&bus);

        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let subscription = b.subscribe(move |_| *counter.lock() += 1);
        subscription.unsubscribe();
        settle().await;

        a.broadcast(ChangeKind::Cleared);
        settle().await;
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_harmless() {
        let bus = ChangeBus::new();
        let notifier = ChangeNotifier::new(&bus);
        assert_eq!(notifier.broadcast(ChangeKind::Cleared), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
