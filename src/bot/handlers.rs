//! Command handlers: text in, text out

use crate::bot::command::{Command, BOT_COMMANDS};
use crate::error::{Error, ProviderErrorKind};
use crate::models::PricePoint;
use crate::services::monitor::{MonitorService, HISTORY_WINDOW_HOURS, RECENT_LIMIT};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{error, info};

const GENERIC_FAILURE: &str = "⚠️ Something went wrong, please try again later.";

/// Telegram rejects messages longer than this many characters.
pub const MAX_REPLY_CHARS: usize = 4096;

pub struct BotHandlers {
    monitor: Arc<MonitorService>,
    forecast_horizon_hours: i64,
}

impl BotHandlers {
    pub fn new(monitor: Arc<MonitorService>, forecast_horizon_hours: i64) -> Self {
        Self {
            monitor,
            forecast_horizon_hours,
        }
    }

    /// Reply to a chat message; `None` when the message is not a command.
    pub async fn handle(&self, user_id: i64, text: &str) -> Option<String> {
        let command = match Command::parse(text) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(e) => return Some(format!("❌ {}\n\nSend /help for usage.", e)),
        };

        info!(user_id = user_id, command = ?command, "Handling command");
        let reply = match self.dispatch(user_id, command).await {
            Ok(reply) => reply,
            Err(e) => error_reply(&e),
        };
        Some(fit_message(reply))
    }

    async fn dispatch(&self, user_id: i64, command: Command) -> Result<String, Error> {
        match command {
            Command::Start => Ok(format!(
                "👋 Welcome to Crypto Monitor!\n\nI track cryptocurrency prices and alert you when they move.\n\n{}",
                help_text()
            )),
            Command::Help => Ok(help_text()),
            Command::Rate { symbol } => {
                let report = self.monitor.rate(&symbol).await?;
                Ok(format!("💰 {}", report.summary()))
            }
            Command::Forecast { symbol } => self.forecast(&symbol).await,
            Command::Subscribe { symbol, condition } => {
                let (subscription, quote) =
                    self.monitor.subscribe(user_id, &symbol, condition).await?;
                Ok(format!(
                    "✅ Subscribed to {}: {} (current: ${:.2})",
                    subscription.symbol, subscription.condition, quote.price
                ))
            }
            Command::Unsubscribe { symbol } => {
                let symbol = symbol.to_uppercase();
                if self.monitor.unsubscribe(user_id, &symbol).await? {
                    Ok(format!("✅ Unsubscribed from {}", symbol))
                } else {
                    Ok(format!("You have no active subscription for {}.", symbol))
                }
            }
            Command::MySubs => self.my_subscriptions(user_id).await,
            Command::History {
                symbol: Some(symbol),
            } => self.price_history(&symbol).await,
            Command::History { symbol: None } => self.forecast_history().await,
            Command::Notifications => self.notifications(user_id).await,
        }
    }

    async fn forecast(&self, symbol: &str) -> Result<String, Error> {
        let record = self.monitor.forecast(symbol).await?;
        let mut reply = format!(
            "📊 Forecast for {} (next {}h)\n\nCurrent: ${:.2}\nPredicted: ${:.2}\nConfidence: {:.1}%",
            record.symbol,
            self.forecast_horizon_hours,
            record.base_price,
            record.predicted_price,
            record.confidence * 100.0
        );
        if !record.rationale.is_empty() {
            let _ = write!(reply, "\n\n{}", record.rationale);
        }
        Ok(reply)
    }

    async fn my_subscriptions(&self, user_id: i64) -> Result<String, Error> {
        let subscriptions = self.monitor.subscriptions(user_id).await?;
        if subscriptions.is_empty() {
            return Ok("You have no active subscriptions. Use /subscribe to add one.".to_string());
        }

        let mut reply = String::from("🔔 Your subscriptions:\n");
        for status in subscriptions {
            let sub = &status.subscription;
            let _ = write!(reply, "\n📈 {}: {}", sub.symbol, sub.condition);
            match status.current_price {
                Some(price) => {
                    let _ = write!(reply, "\nCurrent price: ${:.2}", price);
                }
                None => reply.push_str("\nCurrent price: unavailable"),
            }
            if let Some(change) = status.change_since_subscription {
                let _ = write!(reply, "\nChange since subscription: {:+.2}%", change);
            }
            reply.push('\n');
        }
        Ok(reply.trim_end().to_string())
    }

    async fn price_history(&self, symbol: &str) -> Result<String, Error> {
        let history = self
            .monitor
            .price_history(symbol, HISTORY_WINDOW_HOURS)
            .await?;
        let symbol = symbol.to_uppercase();
        if history.is_empty() {
            return Ok(format!(
                "No price history for {} in the last {} hours.",
                symbol, HISTORY_WINDOW_HOURS
            ));
        }

        let mut reply = format!(
            "Price history for {} (last {} hours, hourly):\n",
            symbol, HISTORY_WINDOW_HOURS
        );
        for point in hourly(history) {
            let _ = write!(
                reply,
                "\n{}: ${:.2}",
                point.recorded_at.format("%Y-%m-%d %H:%M"),
                point.price
            );
            if let Some(change) = point.percent_change_24h {
                let _ = write!(reply, " ({:+.2}%)", change);
            }
        }
        Ok(reply)
    }

    async fn forecast_history(&self) -> Result<String, Error> {
        let forecasts = self.monitor.recent_forecasts(None, RECENT_LIMIT).await?;
        if forecasts.is_empty() {
            return Ok("No forecasts yet. Try /forecast BTC.".to_string());
        }

        let mut reply = String::from("📜 Recent forecasts:\n");
        for forecast in forecasts {
            let _ = write!(
                reply,
                "\n{} {}: predicted ${:.2} from ${:.2} ({:.0}% confidence)",
                forecast.created_at.format("%Y-%m-%d %H:%M"),
                forecast.symbol,
                forecast.predicted_price,
                forecast.base_price,
                forecast.confidence * 100.0
            );
            match (forecast.actual_price, forecast.accuracy_score) {
                (Some(actual), Some(score)) => {
                    let _ = write!(reply, ", actual ${:.2}, accuracy {:.1}%", actual, score * 100.0);
                }
                _ => reply.push_str(", pending"),
            }
        }
        Ok(reply)
    }

    async fn notifications(&self, user_id: i64) -> Result<String, Error> {
        let logs = self.monitor.notifications(user_id, RECENT_LIMIT).await?;
        if logs.is_empty() {
            return Ok("No notifications yet.".to_string());
        }

        let mut reply = String::from("📬 Your recent notifications:\n");
        for log in logs {
            let _ = write!(
                reply,
                "\n📢 {}\nTime: {}\n",
                log.message,
                log.sent_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        Ok(reply.trim_end().to_string())
    }
}

/// Keep the last observation of each hour; input and output are oldest first.
fn hourly(history: Vec<PricePoint>) -> Vec<PricePoint> {
    let mut buckets: Vec<PricePoint> = Vec::new();
    for point in history {
        let hour = point.recorded_at.timestamp().div_euclid(3600);
        match buckets.last_mut() {
            Some(last) if last.recorded_at.timestamp().div_euclid(3600) == hour => *last = point,
            _ => buckets.push(point),
        }
    }
    buckets
}

/// Truncate a reply to what a single chat message can carry.
fn fit_message(reply: String) -> String {
    if reply.chars().count() <= MAX_REPLY_CHARS {
        return reply;
    }
    let mut truncated: String = reply.chars().take(MAX_REPLY_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

pub fn help_text() -> String {
    let mut text = String::from("Available commands:\n");
    for (command, description) in BOT_COMMANDS {
        let _ = write!(text, "\n/{} - {}", command, description);
    }
    text.push_str("\n\nConditions: above <price>, below <price>, change <percent>");
    text
}

/// User-facing text for a failed command
fn error_reply(e: &Error) -> String {
    match e {
        Error::Validation(v) => format!("❌ {}", v),
        Error::Provider(p) if p.kind == ProviderErrorKind::NotFound => {
            "❌ Unknown symbol. Check the ticker, e.g. BTC or ETH.".to_string()
        }
        Error::Provider(p) if p.kind == ProviderErrorKind::RateLimited => {
            "⏳ Price service is busy, please try again in a minute.".to_string()
        }
        Error::NotConfigured(what) => format!("⚠️ {} is not available right now.", what),
        other => {
            error!(error = %other, "Command failed");
            GENERIC_FAILURE.to_string()
        }
    }
}
