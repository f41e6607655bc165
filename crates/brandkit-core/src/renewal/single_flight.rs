use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::RenewalError;
use crate::auth::{AuthService, Session};
use crate::clock::Clock;
use crate::store::CredentialStore;

type Outcome = Result<Arc<Session>, RenewalError>;
type Flight = Shared<BoxFuture<'static, Outcome>>;

/// Observable renewal state of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalState {
    Idle,
    InFlight,
    /// The last renewal failed and the session it belonged to is gone.
    /// Becomes `Idle` as soon as a new session is stored.
    Failed,
}

enum Phase {
    Idle,
    InFlight(Flight),
    Failed { error: RenewalError, generation: u64 },
}

struct Inner {
    store: Arc<CredentialStore>,
    service: Arc<dyn AuthService>,
    clock: Arc<dyn Clock>,
    phase: Mutex<Phase>,
}

/// Renews the access token with at most one refresh call in flight.
///
/// Callers that arrive while a renewal is running await the same outcome.
/// The refresh call runs on its own task, so it completes (and its result
/// is written or discarded) even if every caller goes away.
#[derive(Clone)]
pub struct SingleFlightRenewer {
    inner: Arc<Inner>,
}

impl SingleFlightRenewer {
    pub fn new(
        store: Arc<CredentialStore>,
        service: Arc<dyn AuthService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                service,
                clock,
                phase: Mutex::new(Phase::Idle),
            }),
        }
    }

    pub fn state(&self) -> RenewalState {
        let mut phase = self.inner.phase.lock();
        self.inner.settle(&mut phase);
        match *phase {
            Phase::Idle => RenewalState::Idle,
            Phase::InFlight(_) => RenewalState::InFlight,
            Phase::Failed { .. } => RenewalState::Failed,
        }
    }

    /// Renew the session, or join the renewal already in flight.
    ///
    /// On success the new session is already in the store when this
    /// returns. On failure the store has been cleared.
    pub async fn renew(&self) -> Result<Arc<Session>, RenewalError> {
        let flight = {
            let mut phase = self.inner.phase.lock();
            self.inner.settle(&mut phase);
            let joined = match &*phase {
                Phase::InFlight(flight) => Some(flight.clone()),
                Phase::Failed { error, .. } => return Err(error.clone()),
                Phase::Idle => None,
            };
            match joined {
                Some(flight) => {
                    debug!("Joining in-flight renewal");
                    flight
                }
                None => {
                    let flight = Inner::launch(self.inner.clone());
                    *phase = Phase::InFlight(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }
}

impl Inner {
    /// A failure only sticks for the session generation it ended
    fn settle(&self, phase: &mut Phase) {
        if let Phase::Failed { generation, .. } = phase {
            if *generation != self.store.generation() {
                *phase = Phase::Idle;
            }
        }
    }

    fn launch(inner: Arc<Inner>) -> Flight {
        let worker = inner.clone();
        let task = tokio::spawn(async move {
            let (outcome, generation) = worker.run().await;
            worker.finish(&outcome, generation);
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The worker never reached `finish`
                    *inner.phase.lock() = Phase::Idle;
                    Err(RenewalError::Aborted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// `generation` is the store generation the outcome left behind. A
    /// failure is pinned to it, so any later write lifts the failure.
    fn finish(&self, outcome: &Outcome, generation: u64) {
        let mut phase = self.phase.lock();
        *phase = match outcome {
            Ok(_) => Phase::Idle,
            Err(error) => Phase::Failed {
                error: error.clone(),
                generation,
            },
        };
    }

    async fn run(&self) -> (Outcome, u64) {
        let (current, generation) = self.store.snapshot();
        let refresh_token = match current.as_deref() {
            Some(session) if session.has_refresh_token() => session.refresh_token.clone(),
            Some(_) => {
                warn!("No refresh token available; ending session");
                return match self.store.clear_if(generation) {
                    Some(cleared) => (Err(RenewalError::NoRefreshToken), cleared),
                    None => self.superseded(RenewalError::NoRefreshToken),
                };
            }
            None => return (Err(RenewalError::NoRefreshToken), generation),
        };

        info!(generation, "Renewing access token");
        let renewed = self
            .service
            .refresh(&refresh_token)
            .await
            .and_then(|grant| Session::from_grant(grant, Some(&refresh_token), self.clock.now()));
        match renewed {
            Ok(session) => match self.store.replace_if(generation, session) {
                Some(session) => {
                    info!(expires_at = %session.expires_at, "Access token renewed");
                    (Ok(session), generation + 1)
                }
                None => self.superseded(RenewalError::Superseded),
            },
            Err(e) => {
                let error = RenewalError::from(e);
                match self.store.clear_if(generation) {
                    Some(cleared) => {
                        warn!(error = %error, "Token renewal failed; session ended");
                        (Err(error), cleared)
                    }
                    None => self.superseded(error),
                }
            }
        }
    }

    /// The store moved on while the refresh call was running; whatever it
    /// holds now wins over this renewal's result.
    fn superseded(&self, fallback: RenewalError) -> (Outcome, u64) {
        match self.store.snapshot() {
            (Some(session), generation) => {
                debug!("Renewal result discarded; a newer session is already stored");
                (Ok(session), generation)
            }
            (None, generation) => {
                debug!("Renewal result discarded; session was signed out");
                (Err(fallback), generation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::clock::SystemClock;
    use crate::testing::ScriptedAuthService;
    use chrono::{Duration, Utc};

    fn session(access: &str, refresh: &str) -> Session {
        Session {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_at: Utc::now() + Duration::minutes(1),
            user: Principal::default(),
        }
    }

    fn renewer_with(service: Arc<ScriptedAuthService>) -> (Arc<CredentialStore>, SingleFlightRenewer) {
        let store = Arc::new(CredentialStore::in_memory());
        let renewer = SingleFlightRenewer::new(store.clone(), service, Arc::new(SystemClock));
        (store, renewer)
    }

    async fn wait_for_refresh_calls(service: &ScriptedAuthService, n: usize) {
        while service.refresh_calls() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let service = Arc::new(ScriptedAuthService::new().gated());
        let (store, renewer) = renewer_with(service.clone());
        store.set(session("access-0", "refresh-0"));

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let renewer = renewer.clone();
                tokio::spawn(async move { renewer.renew().await })
            })
            .collect();

        wait_for_refresh_calls(&service, 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(renewer.state(), RenewalState::InFlight);

        service.release(1);
        for caller in callers {
            let session = caller.await.unwrap().expect("renewal should succeed");
            assert_eq!(session.access_token, "access-1");
        }

        assert_eq!(service.refresh_calls(), 1);
        assert_eq!(service.refresh_tokens_seen(), vec!["refresh-0".to_string()]);
        assert_eq!(store.get().unwrap().access_token, "access-1");
        assert_eq!(renewer.state(), RenewalState::Idle);
    }

    #[tokio::test]
    async fn test_sequential_renewals_use_rotated_refresh_token() {
        let service = Arc::new(ScriptedAuthService::new());
        let (store, renewer) = renewer_with(service.clone());
        store.set(session("access-0", "refresh-0"));

        renewer.renew().await.unwrap();
        renewer.renew().await.unwrap();

        assert_eq!(service.refresh_calls(), 2);
        assert_eq!(
            service.refresh_tokens_seen(),
            vec!["refresh-0".to_string(), "refresh-1".to_string()]
        );
        assert_eq!(store.get().unwrap().access_token, "access-2");
    }

    #[tokio::test]
    async fn test_refused_refresh_ends_session() {
        let service = Arc::new(ScriptedAuthService::new());
        service.fail_next_refresh("invalid_grant");
        let (store, renewer) = renewer_with(service.clone());
        store.set(session("access-0", "refresh-0"));

        let err = renewer.renew().await.expect_err("renewal should fail");
        assert!(matches!(err, RenewalError::Rejected { ref reason, .. } if reason == "invalid_grant"));
        assert!(store.get().is_none());
        assert_eq!(renewer.state(), RenewalState::Failed);

        // Terminal: no further remote calls until a new session arrives
        assert!(renewer.renew().await.is_err());
        assert_eq!(service.refresh_calls(), 1);

        store.set(session("access-9", "refresh-9"));
        assert_eq!(renewer.state(), RenewalState::Idle);
        renewer.renew().await.expect("renewal after new login should succeed");
        assert_eq!(service.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_stick_to_session_stored_during_clear() {
        let service = Arc::new(ScriptedAuthService::new());
        service.fail_next_refresh("invalid_grant");
        let (store, renewer) = renewer_with(service.clone());
        store.set(session("access-0", "refresh-0"));

        // A login lands the moment the failed renewal clears the store,
        // before the renewer records its outcome
        let writer = Arc::downgrade(&store);
        store
            .on_change(move |change| {
                if change.is_cleared() {
                    if let Some(store) = writer.upgrade() {
                        store.set(session("access-new", "refresh-new"));
                    }
                }
            })
            .detach();

        let err = renewer.renew().await.expect_err("renewal should fail");
        assert!(matches!(err, RenewalError::Rejected { .. }));
        assert_eq!(store.get().unwrap().access_token, "access-new");
        assert_eq!(renewer.state(), RenewalState::Idle);

        let renewed = renewer.renew().await.expect("new session should renew");
        assert_eq!(renewed.access_token, "access-1");
        assert_eq!(
            service.refresh_tokens_seen(),
            vec!["refresh-0".to_string(), "refresh-new".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_remote_call() {
        let service = Arc::new(ScriptedAuthService::new());
        let (store, renewer) = renewer_with(service.clone());

        assert!(matches!(renewer.renew().await, Err(RenewalError::NoRefreshToken)));

        store.set(session("access-0", ""));
        assert!(matches!(renewer.renew().await, Err(RenewalError::NoRefreshToken)));
        assert!(store.get().is_none());
        assert_eq!(service.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_result_discarded_after_concurrent_logout() {
        let service = Arc::new(ScriptedAuthService::new().gated());
        let (store, renewer) = renewer_with(service.clone());
        store.set(session("access-0", "refresh-0"));

        let pending = {
            let renewer = renewer.clone();
            tokio::spawn(async move { renewer.renew().await })
        };
        wait_for_refresh_calls(&service, 1).await;

        store.clear();
        service.release(1);

        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, Err(RenewalError::Superseded)));
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_newer_session_from_another_writer() {
        let service = Arc::new(ScriptedAuthService::new().gated());
        service.fail_next_refresh("invalid_grant");
        let (store, renewer) = renewer_with(service.clone());
        store.set(session("access-0", "refresh-0"));

        let pending = {
            let renewer = renewer.clone();
            tokio::spawn(async move { renewer.renew().await })
        };
        wait_for_refresh_calls(&service, 1).await;

        // Another context renewed first and its session was adopted
        store.set(session("access-other", "refresh-other"));
        service.release(1);

        let session = pending.await.unwrap().expect("newer session should win");
        assert_eq!(session.access_token, "access-other");
        assert_eq!(store.get().unwrap().access_token, "access-other");
        assert_eq!(renewer.state(), RenewalState::Idle);
    }
}
