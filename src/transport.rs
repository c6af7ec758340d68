//! HTTP transport abstraction and the reqwest-backed implementation

use crate::config::ClientConfig;
use crate::error::{ClientError, Result, TransportError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Description of an outbound call, relative to the API base URL
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Attach `Authorization: Bearer <token>`, marked sensitive
    pub fn bearer(mut self, token: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ClientError::Configuration(format!("token is not a valid header value: {e}")))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// The bearer token currently attached, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

// Bodies may carry credentials, so only their presence is shown.
impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// How the envelope should treat a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    AuthFailure,
    OtherFailure,
}

/// Status and raw body of a completed call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Only 401 counts as an authorization failure; a 403 means the token is
    /// valid but lacks the permission, which re-authenticating will not fix.
    pub fn class(&self) -> ResponseClass {
        if self.status.is_success() {
            ResponseClass::Success
        } else if self.status == StatusCode::UNAUTHORIZED {
            ResponseClass::AuthFailure
        } else {
            ResponseClass::OtherFailure
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn a non-2xx response into [`ClientError::Api`]
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ClientError::Api {
                status: self.status,
                body: preview(&self.body),
            })
        }
    }
}

/// Truncate a response body for error messages
pub(crate) fn preview(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Capability that actually performs network calls
///
/// Every HTTP status is reported as `Ok`; `Err` is reserved for failures
/// where no response was received.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = std::result::Result<ApiResponse, TransportError>> + Send;
}

/// Retry policy for transient transport failures
///
/// Independent of the single re-authentication retry done by the envelope.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait before retry `n` (zero-based) is `backoff_factor * 2^n`
    pub backoff_factor: Duration,
    pub retry_on_status: Vec<StatusCode>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_factor: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_factor,
            ..Self::default()
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_factor
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }

    fn should_retry(&self, outcome: &std::result::Result<ApiResponse, TransportError>) -> bool {
        match outcome {
            Ok(response) => self.retry_on_status.contains(&response.status),
            Err(_) => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: Duration::from_secs(1),
            retry_on_status: vec![
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
        }
    }
}

/// [`Transport`] over reqwest with exponential backoff on 5xx and network errors
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base URL `{base_url}`: {e}")))?;

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            retry,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(&config.base_url, config.timeout()?, config.retry_policy()?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
    ) -> std::result::Result<ApiResponse, TransportError> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), self.url(&request.path))
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(ApiResponse { status, body })
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        request: ApiRequest,
    ) -> std::result::Result<ApiResponse, TransportError> {
        let mut attempt = 0;

        loop {
            let outcome = self.send_once(&request).await;

            if !self.retry.should_retry(&outcome) || attempt + 1 >= self.retry.max_attempts {
                if let Ok(response) = &outcome {
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        status = %response.status,
                        "Request completed"
                    );
                }
                return outcome;
            }

            let wait = self.retry.backoff(attempt);
            match &outcome {
                Ok(response) => warn!(
                    path = %request.path,
                    status = %response.status,
                    attempt = attempt + 1,
                    max_attempts = self.retry.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Request failed, retrying"
                ),
                Err(e) => warn!(
                    path = %request.path,
                    error = %e,
                    attempt = attempt + 1,
                    max_attempts = self.retry.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Request error, retrying"
                ),
            }

            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}
