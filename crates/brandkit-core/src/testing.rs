//! Test doubles for the remote auth service.
//!
//! `ScriptedAuthService` counts calls, hands out numbered token generations
//! (`access-1`, `access-2`, ...) and can hold refresh calls at a gate so
//! tests can pile up concurrent callers while a renewal is in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::auth::{AuthError, AuthService, LoginCredentials, Principal, TokenGrant};

/// Default lifetime of issued access tokens, in seconds
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

pub struct ScriptedAuthService {
    expires_in: i64,
    issued: AtomicUsize,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    refresh_script: Mutex<VecDeque<Result<TokenGrant, AuthError>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedAuthService {
    pub fn new() -> Self {
        Self {
            expires_in: DEFAULT_EXPIRES_IN,
            issued: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            refresh_script: Mutex::new(VecDeque::new()),
            gate: None,
        }
    }

    pub fn with_expires_in(mut self, expires_in: i64) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Hold every refresh call until [`release`](Self::release) is called
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` held refresh calls proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Queue the outcome of the next refresh call that is not yet scripted
    pub fn push_refresh(&self, outcome: Result<TokenGrant, AuthError>) {
        self.refresh_script.lock().push_back(outcome);
    }

    /// Queue a refusal such as `invalid_grant`
    pub fn fail_next_refresh(&self, reason: &str) {
        self.push_refresh(Err(AuthError::Rejected {
            status: 400,
            reason: reason.to_string(),
        }));
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().clone()
    }

    /// Issue the next numbered token generation
    pub fn next_grant(&self) -> TokenGrant {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        TokenGrant {
            access_token: format!("access-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            expires_in: self.expires_in,
            user: Principal::new(serde_json::json!({ "email": "editor@example.com" })),
        }
    }
}

impl Default for ScriptedAuthService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for ScriptedAuthService {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenGrant, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.next_grant())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen.lock().push(refresh_token.to_string());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted = self.refresh_script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.next_grant()))
    }

    async fn logout(&self, _refresh_token: &str) -> Result<(), AuthError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
