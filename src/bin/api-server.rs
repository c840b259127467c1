//! Crypto Monitor API Server
//!
//! HTTP backend with health check, metrics, price, forecast and subscription endpoints.

use crypto_monitor::config::Config;
use crypto_monitor::core::http::{start_server, AppState};
use crypto_monitor::core::runtime::AppServices;
use crypto_monitor::logging;
use dotenvy::dotenv;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = Config::from_env()?;
    logging::init_logging(&config.environment);

    info!("Starting Crypto Monitor API Server");
    info!(environment = %config.environment, "Environment");
    if config.backend.api_key.is_none() {
        warn!("API_KEY not set - /api routes are unauthenticated");
    }

    let bind_address = config.bind_address();
    let api_key = config.backend.api_key.clone();
    let services = AppServices::from_config(config)
        .await
        .map_err(|e| e.to_string())?;

    let state = AppState::new(services.monitor.clone(), services.metrics.clone(), api_key);

    start_server(state, &bind_address, async {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutting down API server...");
        }
    })
    .await?;

    info!("API server stopped");
    Ok(())
}
