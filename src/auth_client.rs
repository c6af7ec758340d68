//! Authenticated-request envelope with per-scope token caching and single-flight refresh

use crate::error::{ClientError, Phase, Result};
use crate::token_store::TokenStore;
use crate::transport::{preview, ApiRequest, ApiResponse, ResponseClass, Transport};
use crate::types::{Credentials, Scope, Token};
use futures::future::{BoxFuture, FutureExt, Shared};
use papaya::HashMap;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Macro to check the token endpoint response status and return error if not successful
macro_rules! check_response {
    ($response:expr, $scope:expr, $error_msg:expr) => {
        if !$response.is_success() {
            return Err(ClientError::authentication(
                $scope,
                format!(
                    "{} with status {}: {}",
                    $error_msg,
                    $response.status,
                    preview(&$response.body)
                ),
            ));
        }
    };
}

/// Configuration for the authentication envelope
#[derive(Debug, Clone)]
pub struct AuthClientConfig {
    /// How long a token is trusted after issue.
    /// Default: 50 minutes (server tokens live 60)
    pub token_ttl: Duration,

    /// Path of the token endpoint, relative to the API base URL.
    /// Default: `/authToken`
    pub token_path: String,
}

impl Default for AuthClientConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(crate::config::DEFAULT_TOKEN_TTL_SECS),
            token_path: "/authToken".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Where the token used for a call came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenOrigin {
    Cached,
    Fresh,
}

/// Result shared by every caller waiting on one exchange
type FlightResult = Shared<BoxFuture<'static, Result<(Token, TokenOrigin)>>>;

/// Token exchange in progress for one scope
#[derive(Clone)]
struct Flight {
    id: u64,
    result: FlightResult,
}

/// Authentication envelope around a [`Transport`]
///
/// Caches one token per [`Scope`], re-authenticates on expiry, and attaches
/// the token as a bearer credential to wrapped calls.
///
/// Token exchanges run on their own tokio task, registered per scope until
/// they finish. A caller that gives up while an exchange is in flight only
/// stops waiting; later callers join the same exchange, which still
/// populates the cache.
pub struct AuthEnvelope<T: Transport> {
    config: AuthClientConfig,
    credentials: Arc<Credentials>,
    transport: Arc<T>,
    token_store: TokenStore,
    /// In-flight exchanges keyed by scope so concurrent misses share one exchange
    flights: Arc<HashMap<Scope, Flight>>,
    next_flight_id: AtomicU64,
}

impl<T: Transport> AuthEnvelope<T> {
    /// Create a new envelope. The token cache starts empty.
    pub fn new(transport: T, credentials: Credentials, config: AuthClientConfig) -> Self {
        Self {
            config,
            credentials: Arc::new(credentials),
            transport: Arc::new(transport),
            token_store: TokenStore::new(),
            flights: Arc::new(HashMap::new()),
            next_flight_id: AtomicU64::new(0),
        }
    }

    /// Get a valid token for `scope`
    ///
    /// Returns the cached token while it is valid, otherwise performs one
    /// token exchange (shared with any concurrent callers for the same scope).
    pub async fn ensure_token(&self, scope: Scope) -> Result<Token> {
        self.acquire(scope).await.map(|(token, _)| token)
    }

    /// [`ensure_token`](Self::ensure_token) for a scope given by name
    ///
    /// Unknown names fail with [`ClientError::Configuration`] before any
    /// network traffic.
    pub async fn ensure_token_named(&self, scope: &str) -> Result<Token> {
        self.ensure_token(scope.parse()?).await
    }

    /// Perform `request` with a bearer token for `scope`
    ///
    /// The response is returned unmodified whatever its status, with one
    /// exception: a 401 on a cached token drops that token and retries once
    /// with a fresh one. A 401 on a fresh token is an authentication error.
    pub async fn with_auth(&self, scope: Scope, request: ApiRequest) -> Result<ApiResponse> {
        let (token, origin) = self.acquire(scope).await?;
        let response = self.send_with_token(scope, &request, &token).await?;

        if response.class() != ResponseClass::AuthFailure {
            return Ok(response);
        }

        self.token_store.remove_if_value(scope, &token.value);

        if origin == TokenOrigin::Fresh {
            warn!(scope = %scope, path = %request.path, "Freshly issued token was rejected");
            return Err(ClientError::authentication(
                scope,
                "request rejected with a freshly issued token",
            ));
        }

        debug!(scope = %scope, path = %request.path, "Cached token rejected, re-authenticating");

        let (token, _) = self.acquire(scope).await?;
        let response = self.send_with_token(scope, &request, &token).await?;

        if response.class() == ResponseClass::AuthFailure {
            self.token_store.remove_if_value(scope, &token.value);
            warn!(scope = %scope, path = %request.path, "Request rejected again after re-authentication");
            return Err(ClientError::authentication(
                scope,
                "request rejected after re-authentication",
            ));
        }

        Ok(response)
    }

    /// [`with_auth`](Self::with_auth) for a scope given by name
    pub async fn with_auth_named(&self, scope: &str, request: ApiRequest) -> Result<ApiResponse> {
        self.with_auth(scope.parse()?, request).await
    }

    /// Drop the cached token so the next call re-authenticates
    pub fn invalidate(&self, scope: Scope) {
        self.token_store.remove(scope);
        debug!(scope = %scope, "Token invalidated");
    }

    /// Discard the cached token and fetch a new one now
    pub async fn refresh_token(&self, scope: Scope) -> Result<Token> {
        info!(scope = %scope, "Refreshing token");
        self.invalidate(scope);
        self.ensure_token(scope).await
    }

    /// Drop every cached token
    pub fn clear(&self) {
        self.token_store.clear();
        debug!("Token cache cleared");
    }

    /// Scopes that currently hold a cached token (possibly expired)
    pub fn cached_scopes(&self) -> Vec<Scope> {
        self.token_store.scopes()
    }

    /// Get the token store (for advanced usage)
    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn acquire(&self, scope: Scope) -> Result<(Token, TokenOrigin)> {
        // Fast path: valid cached token, no flight
        let now = Instant::now();
        if let Some(token) = self.token_store.get_valid(scope, now) {
            debug!(
                scope = %scope,
                remaining_secs = token.remaining(now).as_secs(),
                "Using cached token"
            );
            return Ok((token, TokenOrigin::Cached));
        }

        self.join_flight(scope).await
    }

    /// Await the in-flight exchange for `scope`, starting one if there is none
    async fn join_flight(&self, scope: Scope) -> Result<(Token, TokenOrigin)> {
        let flight = self
            .flights
            .pin()
            .get_or_insert_with(scope, || self.new_flight(scope))
            .clone();

        debug!(scope = %scope, flight = flight.id, "Waiting on token exchange");
        flight.result.await
    }

    /// Build a flight whose exchange task is spawned on first poll
    fn new_flight(&self, scope: Scope) -> Flight {
        let id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let flights = Arc::clone(&self.flights);
        let exchange = Exchange {
            transport: Arc::clone(&self.transport),
            credentials: Arc::clone(&self.credentials),
            token_store: self.token_store.clone(),
            flights: Arc::clone(&self.flights),
            config: self.config.clone(),
            scope,
            id,
        };

        let result = async move {
            tokio::spawn(exchange.run()).await.unwrap_or_else(|e| {
                let _ = flights.pin().remove_if(&scope, |_, flight| flight.id == id);
                Err(ClientError::authentication(
                    scope,
                    format!("token exchange task failed: {e}"),
                ))
            })
        }
        .boxed()
        .shared();

        Flight { id, result }
    }

    async fn send_with_token(
        &self,
        scope: Scope,
        request: &ApiRequest,
        token: &Token,
    ) -> Result<ApiResponse> {
        let request = request.clone().bearer(&token.value)?;
        self.transport
            .send(request)
            .await
            .map_err(|e| ClientError::transport(scope, Phase::Request, e))
    }
}

/// One token exchange, detached from the callers waiting on it
struct Exchange<T: Transport> {
    transport: Arc<T>,
    credentials: Arc<Credentials>,
    token_store: TokenStore,
    flights: Arc<HashMap<Scope, Flight>>,
    config: AuthClientConfig,
    scope: Scope,
    id: u64,
}

impl<T: Transport> Exchange<T> {
    async fn run(self) -> Result<(Token, TokenOrigin)> {
        let scope = self.scope;

        // A flight that finished after the caller's fast-path miss may have
        // stored a token already
        let result = match self.token_store.get_valid(scope, Instant::now()) {
            Some(token) => Ok((token, TokenOrigin::Cached)),
            None => match authenticate(&*self.transport, &self.credentials, &self.config, scope).await {
                Ok(token) => {
                    self.token_store.store(token.clone());
                    info!(
                        scope = %scope,
                        ttl_secs = self.config.token_ttl.as_secs(),
                        "Obtained new token"
                    );
                    Ok((token, TokenOrigin::Fresh))
                }
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Token exchange failed");
                    Err(e)
                }
            },
        };

        // Token is stored before the flight is retired, so no caller can miss both
        let id = self.id;
        let _ = self.flights.pin().remove_if(&scope, |_, flight| flight.id == id);
        result
    }
}

/// Perform the token exchange: `POST {token_path}?claim={scope}`
async fn authenticate<T: Transport>(
    transport: &T,
    credentials: &Credentials,
    config: &AuthClientConfig,
    scope: Scope,
) -> Result<Token> {
    debug!(scope = %scope, username = %credentials.username, "Requesting token");

    let request = ApiRequest::post(config.token_path.as_str())
        .query("claim", scope.as_str())
        .json(&serde_json::json!({
            "username": credentials.username,
            "password": credentials.secret.expose_secret(),
        }))?;

    let response = transport
        .send(request)
        .await
        .map_err(|e| ClientError::transport(scope, Phase::Authentication, e))?;

    check_response!(response, scope, "Token request failed");

    let body: TokenResponse = response.json().map_err(|e| {
        ClientError::authentication(scope, format!("malformed token response: {e}"))
    })?;

    match body.token {
        Some(value) if !value.is_empty() => {
            Ok(Token::new(value, scope, Instant::now(), config.token_ttl))
        }
        _ => Err(ClientError::authentication(scope, "no token in response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use futures::future::join_all;
    use reqwest::header::AUTHORIZATION;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Rejector = Box<dyn Fn(&str) -> bool + Send + Sync>;

    /// In-memory token endpoint plus business API
    ///
    /// Tokens are named `<scope>-tok-<n>` where `n` counts exchanges.
    struct MockTransport {
        exchanges: AtomicUsize,
        calls: Mutex<Vec<(String, Option<String>)>>,
        exchange_delay: Duration,
        reject_credentials: AtomicBool,
        exchange_unreachable: AtomicBool,
        business_status: Mutex<StatusCode>,
        rejects_token: Rejector,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                exchanges: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
                exchange_delay: Duration::from_millis(50),
                reject_credentials: AtomicBool::new(false),
                exchange_unreachable: AtomicBool::new(false),
                business_status: Mutex::new(StatusCode::OK),
                rejects_token: Box::new(|_| false),
            }
        }

        fn rejecting(mut self, rejects: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
            self.rejects_token = Box::new(rejects);
            self
        }

        fn exchanges(&self) -> usize {
            self.exchanges.load(Ordering::SeqCst)
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        async fn send(
            &self,
            request: ApiRequest,
        ) -> std::result::Result<ApiResponse, TransportError> {
            if request.path == "/authToken" {
                let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(self.exchange_delay).await;

                if self.exchange_unreachable.load(Ordering::SeqCst) {
                    return Err(TransportError::Connect("connection refused".to_string()));
                }
                if self.reject_credentials.load(Ordering::SeqCst) {
                    return Ok(ApiResponse::new(
                        StatusCode::UNAUTHORIZED,
                        r#"{"detail":"Invalid credentials"}"#,
                    ));
                }

                let claim = request
                    .query
                    .iter()
                    .find(|(k, _)| k == "claim")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let body = serde_json::json!({ "token": format!("{claim}-tok-{n}") });
                return Ok(ApiResponse::new(StatusCode::OK, body.to_string()));
            }

            let bearer = request.bearer_token().map(str::to_string);
            self.calls
                .lock()
                .unwrap()
                .push((request.path.clone(), bearer.clone()));

            if bearer.as_deref().is_some_and(|t| (self.rejects_token)(t)) {
                return Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""));
            }

            let status = *self.business_status.lock().unwrap();
            Ok(ApiResponse::new(status, r#"{"ok":true}"#))
        }
    }

    fn envelope(transport: MockTransport) -> AuthEnvelope<MockTransport> {
        AuthEnvelope::new(
            transport,
            Credentials::new("alice", "secret"),
            AuthClientConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_exchange() {
        let envelope = envelope(MockTransport::new());

        let first = envelope.ensure_token(Scope::Transfer).await.unwrap();
        let second = envelope.ensure_token(Scope::Transfer).await.unwrap();

        assert_eq!(first.value, "transfer-tok-1");
        assert_eq!(first, second);
        assert_eq!(envelope.transport().exchanges(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_replaced() {
        let envelope = envelope(MockTransport::new());

        let first = envelope.ensure_token(Scope::Enquiry).await.unwrap();

        tokio::time::advance(first.remaining(Instant::now())).await;
        assert!(!first.is_valid_at(Instant::now()));

        let second = envelope.ensure_token(Scope::Enquiry).await.unwrap();
        assert_ne!(first.value, second.value);
        assert_eq!(envelope.transport().exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_exchange() {
        let envelope = Arc::new(envelope(MockTransport::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let envelope = Arc::clone(&envelope);
                tokio::spawn(async move { envelope.ensure_token(Scope::Transfer).await })
            })
            .collect();

        let tokens: Vec<Token> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(envelope.transport().exchanges(), 1);
        assert!(tokens.iter().all(|t| t.value == "transfer-tok-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_are_isolated() {
        let envelope = envelope(MockTransport::new());

        let transfer = envelope.ensure_token(Scope::Transfer).await.unwrap();
        let enquiry = envelope.ensure_token(Scope::Enquiry).await.unwrap();
        assert_ne!(transfer.value, enquiry.value);
        assert_eq!(enquiry.scope, Scope::Enquiry);
        assert_eq!(envelope.transport().exchanges(), 2);

        envelope.invalidate(Scope::Transfer);
        assert_eq!(envelope.cached_scopes(), vec![Scope::Enquiry]);
        assert_eq!(envelope.ensure_token(Scope::Enquiry).await.unwrap(), enquiry);
        assert_eq!(envelope.transport().exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_scope_never_reaches_transport() {
        let envelope = envelope(MockTransport::new());

        let err = envelope.ensure_token_named("bogus").await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));

        let err = envelope
            .with_auth_named("bogus", ApiRequest::get("/accounts"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));

        assert_eq!(envelope.transport().exchanges(), 0);
        assert!(envelope.transport().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_auth_reuses_token_until_expiry() {
        let envelope = envelope(MockTransport::new());

        for _ in 0..3 {
            let response = envelope
                .with_auth(Scope::Transfer, ApiRequest::post("/transfer"))
                .await
                .unwrap();
            assert_eq!(response.status, StatusCode::OK);
            tokio::time::advance(Duration::from_secs(3 * 60)).await;
        }
        assert_eq!(envelope.transport().exchanges(), 1);

        // Minute 51
        tokio::time::advance(Duration::from_secs(42 * 60)).await;
        envelope
            .with_auth(Scope::Transfer, ApiRequest::post("/transfer"))
            .await
            .unwrap();

        assert_eq!(envelope.transport().exchanges(), 2);
        let tokens: Vec<_> = envelope
            .transport()
            .calls()
            .into_iter()
            .map(|(_, bearer)| bearer.unwrap())
            .collect();
        assert_eq!(
            tokens,
            vec!["transfer-tok-1", "transfer-tok-1", "transfer-tok-1", "transfer-tok-2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_cached_token_is_retried_once() {
        let envelope = envelope(MockTransport::new().rejecting(|t| t == "transfer-tok-1"));

        envelope.ensure_token(Scope::Transfer).await.unwrap();
        let response = envelope
            .with_auth(Scope::Transfer, ApiRequest::post("/transfer"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(envelope.transport().exchanges(), 2);
        let calls = envelope.transport().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.as_deref(), Some("transfer-tok-2"));
        assert_eq!(
            envelope.token_store().get(Scope::Transfer).unwrap().value,
            "transfer-tok-2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_rejection_is_authentication_error() {
        let envelope = envelope(MockTransport::new().rejecting(|_| true));

        envelope.ensure_token(Scope::Transfer).await.unwrap();
        let err = envelope
            .with_auth(Scope::Transfer, ApiRequest::post("/transfer"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Authentication { scope: Scope::Transfer, .. }
        ));
        assert_eq!(envelope.transport().exchanges(), 2);
        assert_eq!(envelope.transport().calls().len(), 2);
        assert!(!envelope.token_store().contains(Scope::Transfer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_fresh_token_is_not_retried() {
        let envelope = envelope(MockTransport::new().rejecting(|_| true));

        let err = envelope
            .with_auth(Scope::Enquiry, ApiRequest::get("/accounts"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Authentication { .. }));
        assert_eq!(envelope.transport().exchanges(), 1);
        assert_eq!(envelope.transport().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failures_are_returned_unmodified() {
        let envelope = envelope(MockTransport::new());
        *envelope.transport().business_status.lock().unwrap() = StatusCode::INTERNAL_SERVER_ERROR;

        let response = envelope
            .with_auth(Scope::Transfer, ApiRequest::post("/transfer"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body, r#"{"ok":true}"#);
        assert_eq!(envelope.transport().calls().len(), 1);
        assert_eq!(envelope.transport().exchanges(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials_are_not_cached() {
        let envelope = envelope(MockTransport::new());
        envelope
            .transport()
            .reject_credentials
            .store(true, Ordering::SeqCst);

        let err = envelope.ensure_token(Scope::Transfer).await.unwrap_err();
        match err {
            ClientError::Authentication { scope, reason } => {
                assert_eq!(scope, Scope::Transfer);
                assert!(reason.contains("401"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!envelope.token_store().contains(Scope::Transfer));

        // A later attempt goes back to the network
        envelope
            .transport()
            .reject_credentials
            .store(false, Ordering::SeqCst);
        envelope.ensure_token(Scope::Transfer).await.unwrap();
        assert_eq!(envelope.transport().exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_during_exchange() {
        let envelope = envelope(MockTransport::new());
        envelope
            .transport()
            .exchange_unreachable
            .store(true, Ordering::SeqCst);

        let err = envelope
            .with_auth(Scope::Enquiry, ApiRequest::get("/accounts"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Transport {
                scope: Scope::Enquiry,
                phase: Phase::Authentication,
                source: TransportError::Connect(_),
            }
        ));
        assert!(envelope.transport().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flight_is_shared_by_waiters() {
        let envelope = Arc::new(envelope(MockTransport::new()));
        envelope
            .transport()
            .reject_credentials
            .store(true, Ordering::SeqCst);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let envelope = Arc::clone(&envelope);
                tokio::spawn(async move { envelope.ensure_token(Scope::Transfer).await })
            })
            .collect();

        for joined in join_all(handles).await {
            assert!(matches!(
                joined.unwrap(),
                Err(ClientError::Authentication { scope: Scope::Transfer, .. })
            ));
        }
        assert_eq!(envelope.transport().exchanges(), 1);
        assert_eq!(envelope.flights.len(), 0);

        // The failure is not remembered; the next caller tries again
        envelope.ensure_token(Scope::Transfer).await.unwrap_err();
        assert_eq!(envelope.transport().exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_does_not_cancel_exchange() {
        let envelope = Arc::new(envelope(MockTransport::new()));

        let caller = {
            let envelope = Arc::clone(&envelope);
            tokio::spawn(async move { envelope.ensure_token(Scope::Transfer).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(envelope.token_store().contains(Scope::Transfer));

        let token = envelope.ensure_token(Scope::Transfer).await.unwrap();
        assert_eq!(token.value, "transfer-tok-1");
        assert_eq!(envelope.transport().exchanges(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_after_abandoned_leader_joins_running_exchange() {
        let envelope = Arc::new(envelope(MockTransport::new()));

        let leader = {
            let envelope = Arc::clone(&envelope);
            tokio::spawn(async move { envelope.ensure_token(Scope::Transfer).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();
        assert_eq!(envelope.transport().exchanges(), 1);
        assert!(!envelope.token_store().contains(Scope::Transfer));

        // Exchange still in flight: join it rather than starting another
        let token = envelope.ensure_token(Scope::Transfer).await.unwrap();
        assert_eq!(token.value, "transfer-tok-1");
        assert_eq!(envelope.transport().exchanges(), 1);
        assert_eq!(envelope.token_store().get(Scope::Transfer).unwrap(), token);
        assert_eq!(envelope.flights.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flight_reports_token_found_in_cache_as_cached() {
        let envelope = envelope(MockTransport::new());
        let stored = Token::new(
            "transfer-tok-0".to_string(),
            Scope::Transfer,
            Instant::now(),
            Duration::from_secs(60),
        );
        envelope.token_store().store(stored.clone());

        // A flight started after a fast-path miss must not relabel a cached token
        let (token, origin) = envelope.join_flight(Scope::Transfer).await.unwrap();
        assert_eq!(token, stored);
        assert_eq!(origin, TokenOrigin::Cached);
        assert_eq!(envelope.transport().exchanges(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_and_clear() {
        let envelope = envelope(MockTransport::new());

        let first = envelope.ensure_token(Scope::Transfer).await.unwrap();
        let refreshed = envelope.refresh_token(Scope::Transfer).await.unwrap();
        assert_ne!(first.value, refreshed.value);

        envelope.ensure_token(Scope::Enquiry).await.unwrap();
        assert_eq!(envelope.cached_scopes().len(), 2);

        envelope.clear();
        assert!(envelope.cached_scopes().is_empty());
        assert_eq!(envelope.transport().exchanges(), 3);
    }

    #[test]
    fn test_bearer_attached_to_wrapped_call() {
        let request = ApiRequest::get("/accounts").bearer("abc").unwrap();
        assert_eq!(
            request.headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer abc"
        );
    }
}
