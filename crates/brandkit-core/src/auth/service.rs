//! Client for the remote authentication endpoints (login, refresh, logout).

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AuthError, TokenGrant};
use crate::config::Config;

/// Maximum length of an error body carried into an error message
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The remote service that issues and revokes session tokens.
#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenGrant, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// OAuth-style error body, e.g. `{"error": "invalid_grant"}`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

/// `AuthService` over HTTP with JSON bodies.
#[derive(Clone)]
pub struct HttpAuthService {
    client: Client,
    base_url: String,
    login_path: String,
    refresh_path: String,
    logout_path: String,
}

impl HttpAuthService {
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Share an existing client (and its connection pool)
    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            refresh_path: config.refresh_path.clone(),
            logout_path: config.logout_path.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_grant(response: Response) -> Result<TokenGrant, AuthError> {
        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("Failed to parse token response: {}", e)))
    }

    async fn check_response(response: Response) -> Result<Response, AuthError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AuthError::Rejected {
            status: status.as_u16(),
            reason: Self::reason(&body),
        })
    }

    /// Pull a short reason out of an error body
    fn reason(body: &str) -> String {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        parsed
            .error
            .or(parsed.error_description)
            .or(parsed.message)
            .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_LENGTH).collect())
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenGrant, AuthError> {
        debug!(email = %credentials.email, "Sending login request");
        let response = self
            .client
            .post(self.url(&self.login_path))
            .json(credentials)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }
        Self::read_grant(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        debug!("Sending refresh request");
        let response = self
            .client
            .post(self.url(&self.refresh_path))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        Self::read_grant(response).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        debug!("Sending logout request");
        let response = self
            .client
            .post(self.url(&self.logout_path))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }
}
