//! Authenticated access to the brand panel REST API.
//!
//! All controllers and editors go through `RequestGateway`, which attaches
//! the session's bearer token and transparently renews it once when the
//! API answers 401.

pub mod error;
pub mod gateway;
pub mod request;

pub use error::{ApiError, GatewayError};
pub use gateway::RequestGateway;
pub use request::{ApiRequest, Attempt};
