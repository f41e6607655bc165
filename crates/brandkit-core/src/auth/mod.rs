//! Authentication: the session model, the remote auth service and the
//! `AuthManager` that ties one execution context together.
//!
//! This module provides:
//! - `Session` / `TokenGrant`: the stored credentials and the service's
//!   answer to a login or refresh
//! - `AuthService`: login/refresh/logout endpoints (`HttpAuthService`)
//! - `AuthManager`: store, renewal, sync and gateway for one context
//! - `PasswordVault`: OS-level password storage via keyring

pub mod credentials;
pub mod error;
pub mod manager;
pub mod service;
pub mod session;

pub use credentials::PasswordVault;
pub use error::AuthError;
pub use manager::AuthManager;
pub use service::{AuthService, HttpAuthService, LoginCredentials};
pub use session::{Principal, Session, TokenGrant};
