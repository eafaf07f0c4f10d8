use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use seller_auth::config::Config;
use seller_auth::credentials::{CredentialManager, ManagerSettings};
use seller_auth::crypto::StateSigner;
use seller_auth::providers::EbayProvider;
use seller_auth::{api, store, AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seller_auth=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("seller-auth v{}", env!("CARGO_PKG_VERSION"));
    info!("eBay environment: {:?}", config.environment);

    if config.client_id.is_none() || config.client_secret.is_none() {
        warn!("EBAY_CLIENT_ID/EBAY_CLIENT_SECRET not set; token requests will fail");
    }

    let store = store::open(&config).await?;
    let provider = Arc::new(EbayProvider::new(&config)?);

    let mut builder =
        CredentialManager::builder(provider, Arc::clone(&store), ManagerSettings::from_config(&config));
    match &config.state_secret {
        Some(secret) => builder = builder.state_signer(StateSigner::new(secret)?),
        None => warn!("STATE_SECRET not set; consent flow is disabled"),
    }
    let credentials = builder.build();

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        store,
        credentials,
    });

    let app = api::router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.store.close().await;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
