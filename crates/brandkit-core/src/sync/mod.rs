//! Keeping several execution contexts agreed on the current session.
//!
//! - `ChangeNotifier` / `ChangeBus`: in-process broadcast of
//!   "updated"/"cleared" between contexts sharing a backend
//! - `StorageWatcher`: the same signal for separate processes sharing a
//!   session file

pub mod notifier;
pub mod watcher;

pub use notifier::{ChangeBus, ChangeEvent, ChangeKind, ChangeNotifier, ContextId};
pub use watcher::StorageWatcher;
