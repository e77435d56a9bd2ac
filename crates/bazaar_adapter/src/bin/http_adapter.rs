#![forbid(unsafe_code)]

use std::net::SocketAddr;

use bazaar_adapter::{router, AdapterConfig, AppState};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env()?;
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::from_config(&config)?;
    let app = router(state);

    tracing::info!(
        %addr,
        source_timeout_ms = config.source_timeout_ms,
        primary_source = config.arbitration.primary_source.as_str(),
        "bazaar_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
