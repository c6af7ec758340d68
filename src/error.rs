//! Error types for the banking client

use crate::types::Scope;
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

/// Which leg of an authenticated call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The token exchange against the credential endpoint
    Authentication,
    /// The wrapped business call
    Request,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Authentication => f.write_str("authentication"),
            Phase::Request => f.write_str("request"),
        }
    }
}

/// Network-level failure reported by a [`Transport`](crate::transport::Transport)
///
/// Kept cloneable so a single failed token exchange can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Client error types
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed for scope `{scope}`: {reason}")]
    Authentication { scope: Scope, reason: String },

    #[error("Transport error during {phase} for scope `{scope}`: {source}")]
    Transport {
        scope: Scope,
        phase: Phase,
        #[source]
        source: TransportError,
    },

    #[error("API request failed with status {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl ClientError {
    pub(crate) fn authentication(scope: Scope, reason: impl Into<String>) -> Self {
        ClientError::Authentication {
            scope,
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(scope: Scope, phase: Phase, source: TransportError) -> Self {
        ClientError::Transport {
            scope,
            phase,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
