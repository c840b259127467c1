//! Crypto Monitor Telegram Bot
//!
//! Answers chat commands. Alerts are sent by the worker process.

use crypto_monitor::bot::telegram::run_dispatcher;
use crypto_monitor::bot::BotHandlers;
use crypto_monitor::config::Config;
use crypto_monitor::core::runtime::AppServices;
use crypto_monitor::logging;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::Bot;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = Config::from_env()?;
    logging::init_logging(&config.environment);

    info!("Starting Crypto Monitor Bot");
    info!(environment = %config.environment, "Environment");

    config.require_database_url()?;
    let bot = Bot::new(config.require_bot_token()?);
    let horizon_hours = config.jobs.forecast_horizon_hours;
    let services = AppServices::from_config(config)
        .await
        .map_err(|e| e.to_string())?;

    let handlers = Arc::new(BotHandlers::new(services.monitor.clone(), horizon_hours));

    // Returns on Ctrl-C.
    run_dispatcher(bot, handlers).await;

    info!("Bot stopped");
    Ok(())
}
