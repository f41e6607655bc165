use thiserror::Error;

use super::Attempt;
use crate::renewal::RenewalError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - session is no longer valid")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

/// Error returned to callers of `RequestGateway::send`.
///
/// Wraps the underlying failure and records how far the gateway got with
/// it: whether the request was already re-issued after a renewal, and
/// whether a renewal failed (which means the session is gone).
#[derive(Error, Debug)]
#[error("{source}")]
pub struct GatewayError {
    source: ApiError,
    attempt: Attempt,
    renewal: Option<RenewalError>,
}

impl GatewayError {
    pub fn new(source: ApiError, attempt: Attempt) -> Self {
        Self {
            source,
            attempt,
            renewal: None,
        }
    }

    /// The original authorization failure, after renewal could not recover it
    pub fn session_invalid(source: ApiError, renewal: RenewalError) -> Self {
        Self {
            source,
            attempt: Attempt::NotRetried,
            renewal: Some(renewal),
        }
    }

    pub fn api_error(&self) -> &ApiError {
        &self.source
    }

    pub fn into_api_error(self) -> ApiError {
        self.source
    }

    pub fn was_retried(&self) -> bool {
        self.attempt == Attempt::Retried
    }

    /// Why renewal failed, if this error ended the session
    pub fn renewal_error(&self) -> Option<&RenewalError> {
        self.renewal.as_ref()
    }

    /// The session is gone and the user has to sign in again
    pub fn is_session_invalid(&self) -> bool {
        self.renewal.is_some()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.source.is_unauthorized()
    }
}
