use std::sync::Arc;

use thiserror::Error;

/// Errors from the remote authentication service.
///
/// Clone so a single renewal outcome can be handed to every waiting caller.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Request rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("Invalid response from auth service: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(Arc::new(err))
    }
}
