//! Drop guard returned by `on_change` / `subscribe` style registrations.

use std::fmt;

/// Keeps a listener registered for as long as it is alive.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// removes the listener. Use [`Subscription::detach`] to keep it registered
/// for the lifetime of the thing it was registered on.
#[must_use = "dropping a Subscription unregisters the listener immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unregister the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Leave the listener registered without holding on to the guard.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
