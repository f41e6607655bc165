//! One execution context's view of the session.
//!
//! `AuthManager` owns the credential store and wires it to everything that
//! reacts to session changes:
//!
//! - local change → arm/disarm the renewal timer and broadcast to other
//!   contexts on the bus
//! - remote change event → reload the store from the shared backend, which
//!   in turn rearms or disarms the local timer (no rebroadcast)

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AuthError, AuthService, HttpAuthService, LoginCredentials, Principal, Session};
use crate::api::RequestGateway;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::renewal::{RenewalScheduler, SingleFlightRenewer};
use crate::store::{ChangeSource, CredentialStore, FileBackend, SessionBackend, StoreChange};
use crate::subscription::Subscription;
use crate::sync::{ChangeBus, ChangeKind, ChangeNotifier, StorageWatcher};

pub struct AuthManager {
    config: Config,
    service: Arc<dyn AuthService>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    store: Arc<CredentialStore>,
    renewer: SingleFlightRenewer,
    scheduler: Arc<RenewalScheduler>,
    notifier: Arc<ChangeNotifier>,
    gateway: RequestGateway,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl AuthManager {
    /// Build a context on `bus`. Fails outside a Tokio runtime; timers and
    /// background tasks run on the runtime it was built in.
    ///
    /// Every context on the same bus must use the same backend.
    pub fn new(
        config: Config,
        service: Arc<dyn AuthService>,
        backend: Arc<dyn SessionBackend>,
        bus: &ChangeBus,
    ) -> Result<Self> {
        Self::with_clock(config, service, backend, bus, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        service: Arc<dyn AuthService>,
        backend: Arc<dyn SessionBackend>,
        bus: &ChangeBus,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Self::assemble(config, client, service, backend, bus, clock)
    }

    /// Production wiring: HTTP auth service, session file in the cache
    /// directory, and a private bus.
    pub fn from_config(config: Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let service = Arc::new(HttpAuthService::with_client(client.clone(), &config));
        let backend = Arc::new(FileBackend::new(config.cache_dir()?));
        Self::assemble(
            config,
            client,
            service,
            backend,
            &ChangeBus::new(),
            Arc::new(SystemClock),
        )
    }

    fn assemble(
        config: Config,
        client: Client,
        service: Arc<dyn AuthService>,
        backend: Arc<dyn SessionBackend>,
        bus: &ChangeBus,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let runtime =
            Handle::try_current().context("AuthManager must be created inside a Tokio runtime")?;
        let store = Arc::new(CredentialStore::new(backend));
        let renewer = SingleFlightRenewer::new(store.clone(), service.clone(), clock.clone());
        let scheduler = Arc::new(RenewalScheduler::new(
            renewer.clone(),
            clock.clone(),
            config.renewal_margin(),
            runtime.clone(),
        ));
        let notifier = Arc::new(ChangeNotifier::new(bus));
        let gateway = RequestGateway::new(
            client,
            config.api_base_url.clone(),
            store.clone(),
            renewer.clone(),
            config.auth_routes(),
        );

        let subscriptions = vec![
            store.on_change(Self::rearm_on_change(Arc::downgrade(&scheduler))),
            store.on_change(Self::broadcast_local_change(notifier.clone())),
            Self::follow_remote_changes(&notifier, Arc::downgrade(&store)),
        ];
        debug!(context = %notifier.context_id(), "Auth context ready");

        Ok(Self {
            config,
            service,
            clock,
            runtime,
            store,
            renewer,
            scheduler,
            notifier,
            gateway,
            subscriptions: Mutex::new(subscriptions),
        })
    }

    fn rearm_on_change(scheduler: Weak<RenewalScheduler>) -> impl Fn(&StoreChange) + Send + Sync + 'static {
        move |change| {
            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };
            match change.session.as_deref() {
                Some(session) if session.has_refresh_token() => scheduler.arm(session.expires_at),
                _ => scheduler.disarm(),
            }
        }
    }

    /// Only this context's own writes go out; adopted changes came from
    /// the bus or the backend already.
    fn broadcast_local_change(notifier: Arc<ChangeNotifier>) -> impl Fn(&StoreChange) + Send + Sync + 'static {
        move |change| {
            if change.source != ChangeSource::Local {
                return;
            }
            let kind = match change.session.as_deref() {
                Some(session) => ChangeKind::Updated {
                    expires_at: session.expires_at,
                },
                None => ChangeKind::Cleared,
            };
            notifier.broadcast(kind);
        }
    }

    fn follow_remote_changes(notifier: &ChangeNotifier, store: Weak<CredentialStore>) -> Subscription {
        notifier.subscribe(move |event| {
            let Some(store) = store.upgrade() else {
                return;
            };
            debug!(origin = %event.origin, kind = ?event.kind, "Session changed in another context");
            store.reload();
        })
    }

    /// Sign in and store the new session.
    ///
    /// A failed login leaves the current session untouched.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Arc<Session>, AuthError> {
        info!(email = %credentials.email, "Signing in");
        let grant = self.service.login(credentials).await?;
        let session = Session::from_grant(grant, None, self.clock.now())?;
        if !session.has_refresh_token() {
            warn!("Login response carried no refresh token; session cannot be renewed");
        }
        let session = self.store.set(session);
        info!(
            user = session.user.display_name(),
            expires_at = %session.expires_at,
            "Signed in"
        );
        Ok(session)
    }

    /// Sign out locally right away, then tell the service in the background.
    ///
    /// Returns the handle of the remote logout task, if one was started.
    /// Its failure is logged and otherwise ignored.
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        let previous = self.store.get();
        self.store.clear();
        info!("Signed out");

        let refresh_token = previous
            .filter(|session| session.has_refresh_token())
            .map(|session| session.refresh_token.clone())?;
        let service = self.service.clone();
        Some(self.runtime.spawn(async move {
            if let Err(e) = service.logout(&refresh_token).await {
                warn!(error = %e, "Remote logout failed; local session already cleared");
            }
        }))
    }

    /// Adopt the persisted session at startup.
    ///
    /// A session past its expiry is still restored if it can be renewed;
    /// the renewal timer then fires immediately. One that can't is dropped.
    pub fn restore(&self) -> Option<Arc<Session>> {
        let session = self.store.load()?;
        let now = self.clock.now();
        if session.is_expired_at(now) && !session.has_refresh_token() {
            info!("Stored session expired and cannot be renewed; discarding");
            self.store.clear();
            return None;
        }
        info!(
            user = session.user.display_name(),
            minutes_left = session.minutes_until_expiry(now),
            "Restored session"
        );
        Some(session)
    }

    /// A session is present and either still valid or renewable
    pub fn is_authenticated(&self) -> bool {
        self.store
            .get()
            .map(|session| session.has_refresh_token() || !session.is_expired_at(self.clock.now()))
            .unwrap_or(false)
    }

    pub fn current_user(&self) -> Option<Principal> {
        self.store.get().map(|session| session.user.clone())
    }

    /// Follow session writes made by other processes sharing the backend.
    /// The watcher stops when this manager is dropped.
    pub fn spawn_storage_watcher(&self) {
        let watcher = StorageWatcher::new(&self.store, self.config.sync_interval());
        let _runtime = self.runtime.enter();
        self.subscriptions.lock().push(watcher.spawn());
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.scheduler
    }

    pub fn renewer(&self) -> &SingleFlightRenewer {
        &self.renewer
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::renewal::RenewalState;
    use crate::store::MemoryBackend;
    use crate::testing::ScriptedAuthService;
    use chrono::Duration;

    struct Fixture {
        clock: ManualClock,
        service: Arc<ScriptedAuthService>,
        backend: MemoryBackend,
        manager: AuthManager,
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedAuthService::new())
    }

    fn fixture_with(service: ScriptedAuthService) -> Fixture {
        let clock = ManualClock::default();
        let service = Arc::new(service);
        let backend = MemoryBackend::new();
        let manager = AuthManager::with_clock(
            Config::default(),
            service.clone(),
            Arc::new(backend.clone()),
            &ChangeBus::new(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        Fixture {
            clock,
            service,
            backend,
            manager,
        }
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials::new("editor@example.com", "secret")
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Move the wall clock and Tokio's paused timer together
    async fn advance(f: &Fixture, secs: i64) {
        f.clock.advance(Duration::seconds(secs));
        tokio::time::advance(std::time::Duration::from_secs(secs as u64)).await;
        settle().await;
    }

    #[test]
    fn test_new_outside_runtime_is_an_error() {
        let result = AuthManager::new(
            Config::default(),
            Arc::new(ScriptedAuthService::new()),
            Arc::new(MemoryBackend::new()),
            &ChangeBus::new(),
        );
        let Err(err) = result else {
            panic!("building a context without a runtime should fail");
        };
        assert!(err.to_string().contains("Tokio runtime"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_stores_session_and_arms_timer() {
        let f = fixture();
        let session = f.manager.login(&credentials()).await.unwrap();

        assert_eq!(session.access_token, "access-1");
        assert!(f.manager.is_authenticated());
        assert_eq!(f.backend.load().unwrap().as_ref(), Some(&*session));
        assert_eq!(
            f.manager.scheduler().fire_at(),
            Some(session.expires_at - Duration::seconds(300))
        );
        assert_eq!(
            f.manager.current_user().unwrap().field("email"),
            Some("editor@example.com")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_login_keeps_store_empty() {
        let f = fixture();
        let err = f
            .manager
            .login(&LoginCredentials::new("editor@example.com", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(f.manager.store().get().is_none());
        assert!(!f.manager.scheduler().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_locally_and_revokes_remotely() {
        let f = fixture();
        f.manager.login(&credentials()).await.unwrap();

        let remote = f.manager.logout().expect("remote logout should start");
        assert!(f.manager.store().get().is_none());
        assert!(!f.manager.scheduler().is_armed());
        assert!(f.backend.load().unwrap().is_none());

        remote.await.unwrap();
        assert_eq!(f.service.logout_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_without_session_skips_remote_call() {
        let f = fixture();
        assert!(f.manager.logout().is_none());
        assert_eq!(f.service.logout_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_expired_session_renews_immediately() {
        let f = fixture();
        f.backend
            .save(&Session {
                access_token: "stale".to_string(),
                refresh_token: "refresh-0".to_string(),
                expires_at: f.clock.now() - Duration::minutes(10),
                user: Principal::default(),
            })
            .unwrap();

        let restored = f.manager.restore().expect("renewable session is restored");
        assert_eq!(restored.access_token, "stale");
        settle().await;

        assert_eq!(f.service.refresh_tokens_seen(), vec!["refresh-0"]);
        assert_eq!(f.manager.store().get().unwrap().access_token, "access-1");
        assert_eq!(f.manager.renewer().state(), RenewalState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_drops_expired_unrenewable_session() {
        let f = fixture();
        f.backend
            .save(&Session {
                access_token: "stale".to_string(),
                refresh_token: String::new(),
                expires_at: f.clock.now() - Duration::minutes(10),
                user: Principal::default(),
            })
            .unwrap();

        assert!(f.manager.restore().is_none());
        assert!(f.backend.load().unwrap().is_none());
        assert!(!f.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_renewal_failure_disarms_timer() {
        let f = fixture();
        f.manager.login(&credentials()).await.unwrap();
        assert!(f.manager.scheduler().is_armed());

        f.service.fail_next_refresh("invalid_grant");
        assert!(f.manager.renewer().renew().await.is_err());

        assert!(f.manager.store().get().is_none());
        assert!(!f.manager.scheduler().is_armed());
        assert_eq!(f.manager.renewer().state(), RenewalState::Failed);

        // Signing in again leaves the failed state behind
        f.manager.login(&credentials()).await.unwrap();
        assert_eq!(f.manager.renewer().state(), RenewalState::Idle);
        assert!(f.manager.scheduler().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_shorter_than_margin_renews_halfway_not_in_a_loop() {
        let f = fixture_with(ScriptedAuthService::new().with_expires_in(60));
        let session = f.manager.login(&credentials()).await.unwrap();
        assert_eq!(
            f.manager.scheduler().fire_at(),
            Some(session.expires_at - Duration::seconds(30))
        );

        for _ in 0..500 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.service.refresh_calls(), 0);

        advance(&f, 31).await;
        assert_eq!(f.service.refresh_calls(), 1);
        assert_eq!(f.manager.store().get().unwrap().access_token, "access-2");

        advance(&f, 31).await;
        assert_eq!(f.service.refresh_calls(), 2);
        assert!(f.manager.scheduler().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_expired_grants_are_renewed_at_a_bounded_rate() {
        let f = fixture_with(ScriptedAuthService::new().with_expires_in(0));
        f.manager.login(&credentials()).await.unwrap();

        for _ in 0..500 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.service.refresh_calls(), 1);

        advance(&f, 11).await;
        assert_eq!(f.service.refresh_calls(), 2);
        assert!(f.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_with_out_of_range_lifetime_is_capped() {
        let f = fixture_with(ScriptedAuthService::new().with_expires_in(i64::MAX));
        let session = f.manager.login(&credentials()).await.unwrap();

        assert_eq!(
            session.expires_at,
            f.clock.now() + Duration::seconds(crate::auth::session::MAX_TOKEN_LIFETIME_SECS)
        );
        assert!(f.manager.scheduler().is_armed());
    }
}
