use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::SingleFlightRenewer;
use crate::clock::Clock;

/// Renew this long before the access token expires (5 minutes)
pub const DEFAULT_RENEWAL_MARGIN_SECS: i64 = 300;

/// Least time between two timer-driven renewals
pub const MIN_RENEWAL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

struct ArmedTimer {
    expires_at: DateTime<Utc>,
    fire_at: DateTime<Utc>,
    task: AbortHandle,
}

impl ArmedTimer {
    fn is_pending(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Owns the single proactive-renewal timer of a context.
///
/// `arm` replaces any pending timer, so at most one is ever outstanding.
/// Tokens that live shorter than twice the margin are renewed halfway
/// through their lifetime, and timer-driven renewals are spaced at least
/// [`MIN_RENEWAL_INTERVAL`] apart.
pub struct RenewalScheduler {
    renewer: SingleFlightRenewer,
    clock: Arc<dyn Clock>,
    margin: Duration,
    runtime: Handle,
    timer: Mutex<Option<ArmedTimer>>,
    last_fired: Arc<Mutex<Option<Instant>>>,
}

impl RenewalScheduler {
    /// Timers are spawned on `runtime`.
    pub fn new(
        renewer: SingleFlightRenewer,
        clock: Arc<dyn Clock>,
        margin: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            renewer,
            clock,
            margin: margin.max(Duration::zero()),
            runtime,
            timer: Mutex::new(None),
            last_fired: Arc::new(Mutex::new(None)),
        }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// Schedule a renewal ahead of `expires_at`, replacing any pending
    /// timer. Arming again with the same expiry while that timer is pending
    /// does nothing.
    ///
    /// The renewal fires `margin` before expiry, or halfway through the
    /// remaining lifetime when that is shorter. An expired token is renewed
    /// right away unless a timer fired less than [`MIN_RENEWAL_INTERVAL`]
    /// ago.
    pub fn arm(&self, expires_at: DateTime<Utc>) {
        let mut timer = self.timer.lock();

        if let Some(current) = timer.as_ref() {
            if current.expires_at == expires_at && current.is_pending() {
                return;
            }
        }
        if let Some(previous) = timer.take() {
            previous.task.abort();
        }

        let now = self.clock.now();
        let remaining = expires_at - now;
        let (mut fire_at, mut delay) = if remaining > Duration::zero() {
            let lead = self.margin.min(remaining / 2);
            let fire_at = expires_at - lead;
            let delay = (fire_at - now).to_std().unwrap_or_default();
            (fire_at, delay)
        } else {
            warn!(%expires_at, "Access token has already expired; renewing now");
            (now, std::time::Duration::ZERO)
        };

        if let Some(last) = *self.last_fired.lock() {
            let earliest = (last + MIN_RENEWAL_INTERVAL).saturating_duration_since(Instant::now());
            if earliest > delay {
                debug!(wait_secs = earliest.as_secs(), "Spacing out back-to-back renewals");
                delay = earliest;
                fire_at = Duration::from_std(delay).map_or(fire_at, |wait| now + wait);
            }
        }
        debug!(%fire_at, delay_secs = delay.as_secs(), "Renewal timer armed");

        let renewer = self.renewer.clone();
        let last_fired = self.last_fired.clone();
        let task = self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!(%fire_at, "Renewal timer fired");
            *last_fired.lock() = Some(Instant::now());
            if let Err(e) = renewer.renew().await {
                warn!(error = %e, "Proactive token renewal failed");
            }
        });

        *timer = Some(ArmedTimer {
            expires_at,
            fire_at,
            task: task.abort_handle(),
        });
    }

    /// Cancel the pending timer, if any. A renewal already running is not
    /// interrupted.
    pub fn disarm(&self) {
        if let Some(previous) = self.timer.lock().take() {
            debug!(fire_at = %previous.fire_at, "Renewal timer disarmed");
            previous.task.abort();
        }
    }

    /// When the pending timer will fire, if one is pending
    pub fn fire_at(&self) -> Option<DateTime<Utc>> {
        self.timer
            .lock()
            .as_ref()
            .filter(|timer| timer.is_pending())
            .map(|timer| timer.fire_at)
    }

    pub fn is_armed(&self) -> bool {
        self.fire_at().is_some()
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.task.abort();
        }
    }
}
