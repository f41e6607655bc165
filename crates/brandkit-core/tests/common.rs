//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use brandkit_core::{
    AuthManager, ChangeBus, Config, HttpAuthService, MemoryBackend, Principal, Session,
};
use chrono::Utc;
use serde_json::json;

pub fn config_for(url: &str) -> Config {
    Config {
        api_base_url: url.to_string(),
        ..Config::default()
    }
}

pub fn session(access_token: &str, refresh_token: &str) -> Session {
    Session {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        user: Principal::new(json!({ "email": "editor@example.com" })),
    }
}

pub fn grant_body(access_token: &str, refresh_token: &str) -> String {
    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_in": 3600,
        "user": { "email": "editor@example.com" }
    })
    .to_string()
}

/// A context talking HTTP to `url`, already holding `session`
pub fn http_manager(url: &str, session: Session) -> AuthManager {
    let config = config_for(url);
    let service = Arc::new(HttpAuthService::new(&config).expect("Failed to build auth service"));
    let manager = AuthManager::new(
        config,
        service,
        Arc::new(MemoryBackend::new()),
        &ChangeBus::new(),
    )
    .expect("Failed to build auth manager");
    manager.store().set(session);
    manager
}

/// Wait until `condition` holds, failing the test after two seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for: {what}");
}
