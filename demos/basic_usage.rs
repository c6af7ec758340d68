//! Basic usage example
//!
//! Usage:
//!   BANKING_API_URL=http://localhost:8123 cargo run --example basic_usage

use bankwire_client::{BankingClient, ClientConfig, TransferRequest};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("BANKING_CONFIG") {
        Ok(path) => ClientConfig::from_file(path)?,
        Err(_) => ClientConfig::from_env()?,
    };

    println!("=== Bankwire Client Example ===");
    println!("Endpoint: {}", config.base_url);
    println!("Username: {}", config.username);
    println!();

    let warm_scope = config.auth_scope()?;
    let client = BankingClient::from_config(config)?;

    // Warm the cache for the configured scope
    client.envelope().ensure_token(warm_scope).await?;
    println!("✓ Authenticated for scope `{warm_scope}`");
    println!();

    println!("Fetching accounts...");
    let accounts = client.accounts().await?;
    println!("✓ {} accounts", accounts.len());
    println!();

    println!("Checking balance of ACC1000...");
    match client.balance("ACC1000").await {
        Ok(balance) => println!("✓ {balance}"),
        Err(e) => println!("! Balance lookup failed: {e}"),
    }
    println!();

    println!("Transferring 10.00 from ACC1000 to ACC1001...");
    let result = client
        .transfer(&TransferRequest::new("ACC1000", "ACC1001", 10.0))
        .await?;
    println!(
        "{} status={} transaction={}",
        if result.is_success() { "✓" } else { "!" },
        result.status,
        result.transaction_id.as_deref().unwrap_or("-")
    );
    println!();

    // Cached tokens are reused until they expire
    println!("Cached scopes:");
    for scope in client.envelope().cached_scopes() {
        println!("  - {scope}");
    }

    Ok(())
}
