//! Type definitions for authentication

use crate::error::ClientError;
use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Permission level requested from the token endpoint (`?claim=<scope>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Read-only calls: balances, account lookups, history
    Enquiry,
    /// Money movement
    Transfer,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Enquiry => "enquiry",
            Scope::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enquiry" => Ok(Scope::Enquiry),
            "transfer" => Ok(Scope::Transfer),
            other => Err(ClientError::Configuration(format!(
                "unsupported scope `{other}` (expected one of: enquiry, transfer)"
            ))),
        }
    }
}

/// Username/password pair presented to the token endpoint
///
/// The secret never leaves [`SecretString`], so `Debug` output stays redacted.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub secret: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

/// Bearer token issued for a single scope
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub scope: Scope,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

impl Token {
    pub fn new(value: String, scope: Scope, issued_at: Instant, ttl: Duration) -> Self {
        Self {
            value,
            scope,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
