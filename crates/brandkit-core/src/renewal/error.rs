use std::sync::Arc;

use thiserror::Error;

use crate::auth::AuthError;

/// Why a token renewal failed. Every variant ends the current session.
#[derive(Error, Debug, Clone)]
pub enum RenewalError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Network error during renewal: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("Invalid renewal response: {0}")]
    InvalidResponse(String),

    #[error("Session was signed out while renewal was in flight")]
    Superseded,

    #[error("Renewal task stopped unexpectedly: {0}")]
    Aborted(String),
}

impl From<AuthError> for RenewalError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => RenewalError::Rejected {
                status: 401,
                reason: err.to_string(),
            },
            AuthError::Rejected { status, reason } => RenewalError::Rejected { status, reason },
            AuthError::Network(e) => RenewalError::Network(e),
            AuthError::InvalidResponse(msg) => RenewalError::InvalidResponse(msg),
        }
    }
}
