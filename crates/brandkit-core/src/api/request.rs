use reqwest::Method;
use serde::Serialize;

/// Whether a request has already been re-issued after a token renewal.
///
/// A request starts `NotRetried`; the gateway moves it to `Retried` before
/// re-issuing it, and a `Retried` request never triggers another renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attempt {
    #[default]
    NotRetried,
    Retried,
}

impl Attempt {
    /// May a 401 on this attempt be recovered by renewing the token?
    pub fn may_renew(self) -> bool {
        self == Attempt::NotRetried
    }

    /// The attempt to use for the re-issued request, if one is allowed
    pub fn next(self) -> Option<Attempt> {
        match self {
            Attempt::NotRetried => Some(Attempt::Retried),
            Attempt::Retried => None,
        }
    }
}

/// A re-issuable description of an API call, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    attempt: Attempt,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            attempt: Attempt::NotRetried,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path without any inline query string
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    /// The same request, marked for its single retry.
    ///
    /// Returns `None` if it has already been retried.
    pub fn into_retry(self) -> Option<Self> {
        let attempt = self.attempt.next()?;
        Some(Self { attempt, ..self })
    }
}
