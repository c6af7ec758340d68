//! Bankwire Client
//!
//! A Rust client library for the banking REST API, with automatic JWT
//! authentication, per-scope token caching and single-flight refresh.

pub mod auth_client;
pub mod banking;
pub mod config;
pub mod error;
pub mod token_store;
pub mod transport;
pub mod types;

pub use auth_client::{AuthClientConfig, AuthEnvelope};
pub use banking::{BankingClient, TransferRequest, TransferResult};
pub use config::ClientConfig;
pub use error::{ClientError, Phase, Result, TransportError};
pub use token_store::TokenStore;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ResponseClass, RetryPolicy, Transport};
pub use types::{Credentials, Scope, Token};
