//! Typed calls against the banking API, routed through [`AuthEnvelope`]

use crate::auth_client::AuthEnvelope;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::types::Scope;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Largest page the history endpoint serves
pub const MAX_HISTORY_LIMIT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
}

impl TransferRequest {
    pub fn new(from_account: impl Into<String>, to_account: impl Into<String>, amount: f64) -> Self {
        Self {
            from_account: from_account.into(),
            to_account: to_account.into(),
            amount,
        }
    }

    /// Normalise account ids and reject requests the server could never accept
    fn validated(&self) -> Result<Self> {
        let from_account = account_id(&self.from_account)?;
        let to_account = account_id(&self.to_account)?;

        if from_account == to_account {
            return Err(ClientError::Configuration(
                "source and destination accounts must differ".to_string(),
            ));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ClientError::Configuration(format!(
                "amount must be greater than 0, got {}",
                self.amount
            )));
        }

        Ok(Self {
            from_account,
            to_account,
            amount: self.amount,
        })
    }
}

/// Server verdict on a transfer; unknown fields are kept in `extra`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    #[serde(default)]
    pub status: String,
    pub transaction_id: Option<String>,
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        self.status == "SUCCESS"
    }
}

/// Account id as a path segment: trimmed, upper-cased, alphanumeric only
fn account_id(raw: &str) -> Result<String> {
    let id = raw.trim().to_ascii_uppercase();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ClientError::Configuration(format!(
            "invalid account id `{}`",
            raw.trim()
        )));
    }
    Ok(id)
}

/// Banking API client
///
/// Transfers use the `transfer` scope; everything else uses `enquiry`.
pub struct BankingClient<T: Transport = HttpTransport> {
    envelope: AuthEnvelope<T>,
}

impl BankingClient<HttpTransport> {
    /// Build an HTTP-backed client from configuration
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(&config)?;
        let auth_config = config.auth_client_config();
        info!(base_url = %transport.base_url(), "Banking client initialized");

        Ok(Self::new(AuthEnvelope::new(
            transport,
            config.into_credentials(),
            auth_config,
        )))
    }
}

impl<T: Transport> BankingClient<T> {
    pub fn new(envelope: AuthEnvelope<T>) -> Self {
        Self { envelope }
    }

    pub fn envelope(&self) -> &AuthEnvelope<T> {
        &self.envelope
    }

    /// `POST /transfer`
    ///
    /// A server-side rejection (`status != "SUCCESS"`) is still `Ok`; only
    /// transport, auth and non-2xx failures are errors.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransferResult> {
        let request = request.validated()?;
        info!(
            from = %request.from_account,
            to = %request.to_account,
            amount = request.amount,
            "Initiating transfer"
        );

        let result: TransferResult = self
            .call(Scope::Transfer, ApiRequest::post("/transfer").json(&request)?)
            .await?;

        if result.is_success() {
            info!(transaction_id = ?result.transaction_id, "Transfer successful");
        } else {
            warn!(status = %result.status, message = ?result.message, "Transfer rejected");
        }

        Ok(result)
    }

    /// Run transfers concurrently; results come back in input order
    pub async fn transfer_batch(&self, requests: &[TransferRequest]) -> Vec<Result<TransferResult>> {
        info!(count = requests.len(), "Executing transfer batch");
        join_all(requests.iter().map(|request| self.transfer(request))).await
    }

    /// `GET /accounts/validate/{id}`
    pub async fn validate_account(&self, id: &str) -> Result<Value> {
        let id = account_id(id)?;
        self.call(Scope::Enquiry, ApiRequest::get(format!("/accounts/validate/{id}")))
            .await
    }

    /// `GET /accounts/balance/{id}`
    pub async fn balance(&self, id: &str) -> Result<Value> {
        let id = account_id(id)?;
        self.call(Scope::Enquiry, ApiRequest::get(format!("/accounts/balance/{id}")))
            .await
    }

    /// `GET /accounts`
    pub async fn accounts(&self) -> Result<Vec<Value>> {
        let accounts: Vec<Value> = self.call(Scope::Enquiry, ApiRequest::get("/accounts")).await?;
        info!(count = accounts.len(), "Retrieved accounts");
        Ok(accounts)
    }

    /// `GET /transactions/history?limit=n`, with `n` capped at [`MAX_HISTORY_LIMIT`]
    pub async fn transaction_history(&self, limit: u32) -> Result<Value> {
        let limit = limit.min(MAX_HISTORY_LIMIT);
        self.call(
            Scope::Enquiry,
            ApiRequest::get("/transactions/history").query("limit", limit),
        )
        .await
    }

    async fn call<D: DeserializeOwned>(&self, scope: Scope, request: ApiRequest) -> Result<D> {
        self.envelope
            .with_auth(scope, request)
            .await?
            .error_for_status()?
            .json()
    }
}
