//! Authenticated request wrapper used by every panel controller.
//!
//! Attaches the current access token, and on a 401 renews the session
//! through the single-flight renewer and re-issues the request once.

use std::sync::Arc;

use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, Attempt, GatewayError};
use crate::renewal::{RenewalError, SingleFlightRenewer};
use crate::store::CredentialStore;

#[derive(Clone)]
pub struct RequestGateway {
    client: Client,
    base_url: String,
    store: Arc<CredentialStore>,
    renewer: SingleFlightRenewer,
    /// Login and refresh routes: never authorized, never renewed
    exempt_routes: Vec<String>,
}

impl RequestGateway {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        store: Arc<CredentialStore>,
        renewer: SingleFlightRenewer,
        exempt_routes: Vec<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            renewer,
            exempt_routes,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn is_exempt(&self, request: &ApiRequest) -> bool {
        let route = request.route();
        self.exempt_routes.iter().any(|exempt| exempt == route)
    }

    /// Send a request, renewing the session and retrying once on 401.
    ///
    /// Returns the response for any 2xx status. Other statuses and
    /// transport failures come back as a [`GatewayError`] without renewal.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, GatewayError> {
        let exempt = self.is_exempt(&request);
        let mut request = request;

        loop {
            let token = if exempt {
                None
            } else {
                self.store.get().map(|session| session.access_token.clone())
            };

            let response = self
                .dispatch(&request, token.as_deref())
                .await
                .map_err(|e| GatewayError::new(e, request.attempt()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let error = ApiError::from_status(status, &body);
            if !error.is_unauthorized() || exempt || !request.attempt().may_renew() {
                if error.is_unauthorized() && request.attempt() == Attempt::Retried {
                    warn!(path = request.path(), "Request rejected again after token renewal");
                }
                return Err(GatewayError::new(error, request.attempt()));
            }

            debug!(path = request.path(), "Request unauthorized; renewing session");
            if let Err(renewal) = self.recover(token.as_deref()).await {
                warn!(path = request.path(), error = %renewal, "Session could not be renewed");
                return Err(GatewayError::session_invalid(error, renewal));
            }

            request = match request.into_retry() {
                Some(retry) => retry,
                None => return Err(GatewayError::new(error, Attempt::Retried)),
            };
        }
    }

    /// Get a usable session after `used_token` was rejected.
    ///
    /// If the store already holds a different token, someone renewed while
    /// this request was on the wire and there is nothing left to do.
    async fn recover(&self, used_token: Option<&str>) -> Result<(), RenewalError> {
        if let Some(current) = self.store.get() {
            if used_token != Some(current.access_token.as_str()) {
                debug!("Session already renewed by a concurrent request");
                return Ok(());
            }
        }
        self.renewer.renew().await.map(|_| ())
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, request.path());
        let mut builder = self.client.request(request.method().clone(), &url);
        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send().await?)
    }

    async fn read_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, GatewayError> {
        response.json().await.map_err(|e| {
            GatewayError::new(
                ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e)),
                Attempt::NotRetried,
            )
        })
    }

    fn encode<B: Serialize + ?Sized>(request: ApiRequest, body: &B) -> Result<ApiRequest, GatewayError> {
        request.json(body).map_err(|e| {
            GatewayError::new(
                ApiError::InvalidRequest(format!("Failed to encode request body: {}", e)),
                Attempt::NotRetried,
            )
        })
    }

    // ===== Typed helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Self::read_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let request = Self::encode(ApiRequest::post(path), body)?;
        let response = self.send(request).await?;
        Self::read_json(response, path).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let request = Self::encode(ApiRequest::put(path), body)?;
        let response = self.send(request).await?;
        Self::read_json(response, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }
}
