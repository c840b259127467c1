//! Application service shared by the chat bot and the HTTP backend

use crate::db::{retry_write, Storage};
use crate::error::{Error, Result, ValidationError};
use crate::metrics::Metrics;
use crate::models::{
    normalize_symbol, Condition, ForecastRecord, NewForecastRecord, NewSubscription,
    NotificationLog, PricePoint, PriceQuote, Subscription, Trend,
};
use crate::services::forecast::ForecastProvider;
use crate::services::market_data::PriceProvider;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Window used for `/history`, trends and forecast prompts.
pub const HISTORY_WINDOW_HOURS: i64 = 24;
/// Upper bound accepted for history queries (30 days).
pub const MAX_HISTORY_HOURS: i64 = 720;
pub const RECENT_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct RateReport {
    pub quote: PriceQuote,
    pub trend: Trend,
}

impl RateReport {
    /// One-line human summary, e.g. `BTC: $51000.00 (+1.25% 24h), trend up 📈`
    pub fn summary(&self) -> String {
        let change = self
            .quote
            .percent_change_24h
            .map(|c| format!(" ({:+.2}% 24h)", c))
            .unwrap_or_default();
        format!(
            "{}: ${:.2}{}, trend {}",
            self.quote.symbol, self.quote.price, change, self.trend
        )
    }
}

/// A subscription together with the price it currently sees
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub subscription: Subscription,
    pub current_price: Option<f64>,
    pub change_since_subscription: Option<f64>,
}

pub struct MonitorService {
    storage: Arc<dyn Storage>,
    prices: Arc<dyn PriceProvider>,
    forecaster: Option<Arc<dyn ForecastProvider>>,
    metrics: Option<Arc<Metrics>>,
}

impl MonitorService {
    pub fn new(
        storage: Arc<dyn Storage>,
        prices: Arc<dyn PriceProvider>,
        forecaster: Option<Arc<dyn ForecastProvider>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            storage,
            prices,
            forecaster,
            metrics,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn forecasts_enabled(&self) -> bool {
        self.forecaster.is_some()
    }

    /// Fetch a quote and append it to price history.
    ///
    /// A failed history write is logged; the quote is still returned.
    async fn fetch_and_record(&self, symbol: &str) -> Result<PriceQuote> {
        let quote = self.prices.quote(symbol).await?;
        let point = PricePoint::from_quote(&quote, self.prices.name());
        if let Err(e) = retry_write("store_price", || self.storage.store_price(&point)).await {
            warn!(symbol = %symbol, error = %e, "Failed to store price point");
        }
        Ok(quote)
    }

    pub async fn rate(&self, raw_symbol: &str) -> Result<RateReport> {
        let symbol = normalize_symbol(raw_symbol)?;
        let quote = self.fetch_and_record(&symbol).await?;
        let history = self
            .storage
            .price_history(&symbol, Utc::now() - Duration::hours(HISTORY_WINDOW_HOURS))
            .await?;

        Ok(RateReport {
            trend: Trend::from_history(&history),
            quote,
        })
    }

    /// Request a forecast and persist it; invalid forecasts are never stored.
    pub async fn forecast(&self, raw_symbol: &str) -> Result<ForecastRecord> {
        let symbol = normalize_symbol(raw_symbol)?;
        let forecaster = self
            .forecaster
            .as_ref()
            .ok_or(Error::NotConfigured("forecast provider"))?;

        let quote = self.fetch_and_record(&symbol).await?;
        let history = self
            .storage
            .price_history(&symbol, Utc::now() - Duration::hours(HISTORY_WINDOW_HOURS))
            .await?;

        let forecast = forecaster.forecast(&symbol, &quote, &history).await?;
        let record = NewForecastRecord {
            symbol: symbol.clone(),
            forecast,
            base_price: quote.price,
            created_at: Utc::now(),
        };
        let stored = retry_write("store_forecast", || self.storage.store_forecast(&record)).await?;

        if let Some(metrics) = &self.metrics {
            metrics.forecasts_generated_total.inc();
        }
        info!(
            symbol = %symbol,
            forecast_id = stored.id,
            predicted_price = stored.predicted_price,
            "Stored forecast"
        );
        Ok(stored)
    }

    /// Create or replace the user's subscription on a symbol.
    ///
    /// The symbol is checked against the price provider first and the current
    /// price becomes the subscription's reference price.
    pub async fn subscribe(
        &self,
        user_id: i64,
        raw_symbol: &str,
        condition: Condition,
    ) -> Result<(Subscription, PriceQuote)> {
        let symbol = normalize_symbol(raw_symbol)?;
        condition.validate()?;

        let quote = self.fetch_and_record(&symbol).await?;
        let new = NewSubscription {
            user_id,
            symbol,
            condition,
            reference_price: Some(quote.price),
        };
        let subscription =
            retry_write("upsert_subscription", || self.storage.upsert_subscription(&new)).await?;

        info!(
            user_id = user_id,
            symbol = %subscription.symbol,
            condition = %subscription.condition,
            "Subscription saved"
        );
        Ok((subscription, quote))
    }

    pub async fn unsubscribe(&self, user_id: i64, raw_symbol: &str) -> Result<bool> {
        let symbol = normalize_symbol(raw_symbol)?;
        let removed = retry_write("deactivate_subscription", || {
            self.storage.deactivate_subscription(user_id, &symbol)
        })
        .await?;

        if removed {
            info!(user_id = user_id, symbol = %symbol, "Subscription deactivated");
        }
        Ok(removed)
    }

    /// Active subscriptions with live prices; a symbol whose quote fails shows no price.
    pub async fn subscriptions(&self, user_id: i64) -> Result<Vec<SubscriptionStatus>> {
        let subscriptions = self.storage.user_subscriptions(user_id).await?;

        let mut prices: HashMap<String, Option<f64>> = HashMap::new();
        for subscription in &subscriptions {
            if prices.contains_key(&subscription.symbol) {
                continue;
            }
            let price = match self.prices.quote(&subscription.symbol).await {
                Ok(quote) => Some(quote.price),
                Err(e) => {
                    warn!(symbol = %subscription.symbol, error = %e, "Quote unavailable for subscription list");
                    None
                }
            };
            prices.insert(subscription.symbol.clone(), price);
        }

        Ok(subscriptions
            .into_iter()
            .map(|subscription| {
                let current_price = prices.get(&subscription.symbol).copied().flatten();
                SubscriptionStatus {
                    change_since_subscription: current_price
                        .and_then(|price| subscription.change_since_subscription(price)),
                    current_price,
                    subscription,
                }
            })
            .collect())
    }

    pub async fn price_history(&self, raw_symbol: &str, hours: i64) -> Result<Vec<PricePoint>> {
        let symbol = normalize_symbol(raw_symbol)?;
        if !(1..=MAX_HISTORY_HOURS).contains(&hours) {
            return Err(ValidationError::InvalidValue {
                field: "hours",
                reason: format!("{} is outside 1..={}", hours, MAX_HISTORY_HOURS),
            }
            .into());
        }

        Ok(self
            .storage
            .price_history(&symbol, Utc::now() - Duration::hours(hours))
            .await?)
    }

    pub async fn recent_forecasts(
        &self,
        raw_symbol: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ForecastRecord>> {
        let symbol = raw_symbol.map(normalize_symbol).transpose()?;
        Ok(self
            .storage
            .recent_forecasts(symbol.as_deref(), limit.clamp(1, MAX_LIST_LIMIT))
            .await?)
    }

    pub async fn notifications(&self, user_id: i64, limit: usize) -> Result<Vec<NotificationLog>> {
        Ok(self
            .storage
            .user_notifications(user_id, limit.clamp(1, MAX_LIST_LIMIT))
            .await?)
    }
}
