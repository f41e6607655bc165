//! Core library for brandkit.
//!
//! Everything the brand panel's controllers and editors need to talk to the
//! backend API as a signed-in user:
//!
//! - [`api`]: `RequestGateway`, the authenticated request wrapper with
//!   renew-and-retry-once on 401
//! - [`auth`]: session model, the remote auth service and the `AuthManager`
//!   that wires one execution context together
//! - [`store`]: `CredentialStore`, the single source of truth for the session
//! - [`renewal`]: proactive (`RenewalScheduler`) and reactive
//!   (`SingleFlightRenewer`) token renewal
//! - [`sync`]: cross-context change notification and storage watching
//! - [`config`]: on-disk configuration

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod renewal;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod testing;

pub use api::{ApiError, ApiRequest, Attempt, GatewayError, RequestGateway};
pub use auth::{
    AuthError, AuthManager, AuthService, HttpAuthService, LoginCredentials, PasswordVault,
    Principal, Session, TokenGrant,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use renewal::{RenewalError, RenewalScheduler, RenewalState, SingleFlightRenewer};
pub use store::{
    ChangeSource, CredentialStore, FileBackend, MemoryBackend, SessionBackend, StoreChange,
    StoreError,
};
pub use subscription::Subscription;
pub use sync::{ChangeBus, ChangeEvent, ChangeKind, ChangeNotifier, ContextId, StorageWatcher};
