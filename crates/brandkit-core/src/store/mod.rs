//! Session storage.
//!
//! This module provides:
//! - `CredentialStore`: the in-memory source of truth with change listeners
//!   and generation tracking
//! - `SessionBackend`: durable storage behind it (`FileBackend` for disk,
//!   `MemoryBackend` for tests and single-process deployments)

pub mod backend;
pub mod credential_store;

pub use backend::{FileBackend, MemoryBackend, SessionBackend, StoreError};
pub use credential_store::{ChangeSource, CredentialStore, StoreChange};
