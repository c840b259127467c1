//! Crypto Monitor Worker
//!
//! Runs the alert job plus forecast reconciliation and retention on fixed intervals.
//! Run a single instance; ticks are not coordinated across processes.

use crypto_monitor::config::Config;
use crypto_monitor::core::runtime::{AppServices, WorkerRuntime};
use crypto_monitor::logging;
use crypto_monitor::services::notifier::{Notifier, TelegramNotifier};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = Config::from_env()?;
    logging::init_logging(&config.environment);

    info!("Starting Crypto Monitor Worker");
    info!(
        environment = %config.environment,
        alert_interval = config.jobs.alert_interval_seconds,
        concurrency = config.jobs.alert_concurrency,
        "Environment"
    );

    // Subscriptions are written by the bot process; only a shared database carries them here.
    config.require_database_url()?;
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(config.require_bot_token()?));
    let services = AppServices::from_config(config)
        .await
        .map_err(|e| e.to_string())?;

    let runtime = WorkerRuntime::new(&services, notifier).map_err(|e| e.to_string())?;
    runtime.start().await;

    info!("Worker started, waiting for shutdown signal...");
    signal::ctrl_c().await?;

    info!("Shutting down worker...");
    runtime.stop().await;
    info!("Worker stopped");

    Ok(())
}
