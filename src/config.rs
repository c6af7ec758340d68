//! Client configuration loaded from defaults, a JSON file and `BANKING_*` environment variables

use crate::auth_client::AuthClientConfig;
use crate::error::{ClientError, Result};
use crate::transport::RetryPolicy;
use crate::types::{Credentials, Scope};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8123";

/// Token lifetime assumed by the client: 50 minutes against the server's 60
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 50 * 60;

/// Server tokens live an hour; anything past a day is a misconfiguration
pub const MAX_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Configuration for the banking client
///
/// Precedence: environment variables, then the config file, then defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(alias = "timeout")]
    pub timeout_secs: f64,

    pub username: String,
    pub password: SecretString,

    /// Scope fetched up front by callers that want to warm the cache
    pub auth_scope: String,

    /// Total attempts for transient failures (5xx, network errors)
    pub max_retries: u32,

    /// Backoff base in seconds; retry `n` waits `retry_backoff * 2^n`
    #[serde(alias = "retry_backoff_factor")]
    pub retry_backoff: f64,

    pub token_ttl_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10.0,
            username: "alice".to_string(),
            password: SecretString::from("password123".to_string()),
            auth_scope: Scope::Transfer.as_str().to_string(),
            max_retries: 3,
            retry_backoff: 1.0,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `BANKING_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Load a JSON config file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Configuration(format!("reading config file {}: {e}", path.display()))
        })?;
        let config: ClientConfig = serde_json::from_str(&raw).map_err(|e| {
            ClientError::Configuration(format!("parsing config file {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Loaded configuration file");

        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BANKING_API_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("BANKING_API_TIMEOUT") {
            self.timeout_secs = parse_env("BANKING_API_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("BANKING_USERNAME") {
            self.username = v;
        }
        if let Some(v) = lookup("BANKING_PASSWORD") {
            self.password = SecretString::from(v);
        }
        if let Some(v) = lookup("BANKING_AUTH_SCOPE") {
            self.auth_scope = v;
        }
        if let Some(v) = lookup("BANKING_MAX_RETRIES") {
            self.max_retries = parse_env("BANKING_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("BANKING_RETRY_BACKOFF") {
            self.retry_backoff = parse_env("BANKING_RETRY_BACKOFF", &v)?;
        }
        if let Some(v) = lookup("BANKING_TOKEN_TTL") {
            self.token_ttl_secs = parse_env("BANKING_TOKEN_TTL", &v)?;
        }

        self.validate()?;
        debug!(base_url = %self.base_url, username = %self.username, "Configuration resolved");
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let timeout = self.timeout()?;
        if timeout.is_zero() {
            return Err(ClientError::Configuration(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }
        self.retry_policy()?;
        if self.token_ttl_secs == 0 || self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ClientError::Configuration(format!(
                "token TTL must be between 1 and {MAX_TOKEN_TTL_SECS} seconds, got {}",
                self.token_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration> {
        seconds("timeout", self.timeout_secs)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let backoff = seconds("retry backoff", self.retry_backoff)?;
        Ok(RetryPolicy::new(self.max_retries, backoff))
    }

    pub fn auth_client_config(&self) -> AuthClientConfig {
        AuthClientConfig {
            token_ttl: Duration::from_secs(self.token_ttl_secs),
            ..AuthClientConfig::default()
        }
    }

    pub fn auth_scope(&self) -> Result<Scope> {
        self.auth_scope.parse()
    }

    /// Split out the credentials, consuming the config
    pub fn into_credentials(self) -> Credentials {
        Credentials {
            username: self.username,
            secret: self.password,
        }
    }
}

/// Seconds as a `Duration`; rejects negative, NaN and out-of-range values
fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        ClientError::Configuration(format!("invalid {name} of {value} seconds: {e}"))
    })
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ClientError::Configuration(format!("invalid value for {key}: {e}")))
}
