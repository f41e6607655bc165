use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Longest access token lifetime accepted from the auth service (one year)
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// The signed-in user's profile as returned by the auth service.
///
/// Treated as an opaque JSON blob; it is replaced wholesale on every login
/// and renewal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(serde_json::Value);

impl Principal {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Look up a top-level string field such as `email` or `name`
    pub fn field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Best-effort label for logs and status output
    pub fn display_name(&self) -> &str {
        self.field("name")
            .or_else(|| self.field("email"))
            .unwrap_or("unknown user")
    }
}

/// Body returned by the login and refresh endpoints.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Some services keep the refresh token unchanged and omit it on refresh
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    #[serde(default)]
    pub user: Principal,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("user", &self.user)
            .finish()
    }
}

/// A complete authenticated session.
///
/// Sessions are never patched in place: a renewal produces a new `Session`
/// that replaces the old one in the `CredentialStore`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Principal,
}

impl Session {
    /// Build a session from a login or refresh response.
    ///
    /// `previous_refresh` is kept when the grant does not carry a new
    /// refresh token. Negative lifetimes count as already expired and
    /// lifetimes above [`MAX_TOKEN_LIFETIME_SECS`] are capped.
    pub fn from_grant(
        grant: TokenGrant,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let refresh_token = grant
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();

        let lifetime = grant.expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS);
        let expires_at = now
            .checked_add_signed(Duration::seconds(lifetime))
            .ok_or_else(|| {
                AuthError::InvalidResponse(format!("Token lifetime out of range: {}s", grant.expires_in))
            })?;

        Ok(Self {
            access_token: grant.access_token,
            refresh_token,
            expires_at,
            user: grant.user,
        })
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry(now).num_minutes().max(0)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}
