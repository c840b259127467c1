//! CoinMarketCap quotes client

use crate::config::MarketDataConfig;
use crate::error::ProviderError;
use crate::models::PriceQuote;
use crate::services::market_data::PriceProvider;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER: &str = "coinmarketcap";
const QUOTES_PATH: &str = "v1/cryptocurrency/quotes/latest";

pub struct CoinMarketCapClient {
    http: reqwest::Client,
    api_key: String,
    quotes_url: String,
    max_attempts: usize,
    retry_delay: Duration,
}

impl CoinMarketCapClient {
    pub fn new(config: &MarketDataConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::network(PROVIDER, format!("Failed to build client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            quotes_url: format!(
                "{}/{}",
                config.base_url.as_str().trim_end_matches('/'),
                QUOTES_PATH
            ),
            max_attempts: config.max_attempts,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Override the initial backoff delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn fetch_once(&self, symbol: &str) -> Result<PriceQuote, ProviderError> {
        let response = self
            .http
            .get(&self.quotes_url)
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::network(PROVIDER, format!("Request timed out: {}", e))
                } else {
                    ProviderError::network(PROVIDER, format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(ProviderError::invalid_response(
                    PROVIDER,
                    format!("Failed to parse response: {}", e),
                ))
            }
            Err(_) => Value::Null,
        };

        if !status.is_success() {
            return Err(classify_status(status, symbol, &body));
        }

        parse_quote(symbol, &body, Utc::now())
    }
}

#[async_trait]
impl PriceProvider for CoinMarketCapClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn quote(&self, symbol: &str) -> Result<PriceQuote, ProviderError> {
        let quote = (|| async { self.fetch_once(symbol).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.retry_delay)
                    .with_max_times(self.max_attempts.saturating_sub(1)),
            )
            .when(ProviderError::is_retryable)
            .notify(|e, delay| {
                warn!(
                    symbol = %symbol,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Price fetch failed, retrying"
                );
            })
            .await?;

        debug!(symbol = %quote.symbol, price = quote.price, "Fetched quote");
        Ok(quote)
    }
}

fn error_message(body: &Value) -> String {
    body.pointer("/status/error_message")
        .and_then(Value::as_str)
        .unwrap_or("no error message")
        .to_string()
}

fn classify_status(status: StatusCode, symbol: &str, body: &Value) -> ProviderError {
    let message = error_message(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(PROVIDER, message),
        StatusCode::BAD_REQUEST if message.to_lowercase().contains("symbol") => {
            ProviderError::not_found(PROVIDER, format!("Unknown symbol {}: {}", symbol, message))
        }
        s if s.is_server_error() => {
            ProviderError::network(PROVIDER, format!("HTTP {}: {}", s.as_u16(), message))
        }
        s => ProviderError::invalid_response(PROVIDER, format!("HTTP {}: {}", s.as_u16(), message)),
    }
}

/// Extract `data[SYMBOL].quote.USD` from a quotes response.
///
/// The entry may be a single object or a list of candidates sharing the ticker;
/// the first candidate wins.
fn parse_quote(
    symbol: &str,
    body: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<PriceQuote, ProviderError> {
    let entry = match body.get("data").and_then(|data| data.get(symbol)) {
        Some(Value::Array(candidates)) => candidates.first(),
        Some(Value::Null) | None => None,
        Some(entry) => Some(entry),
    }
    .ok_or_else(|| ProviderError::not_found(PROVIDER, format!("No quote for {}", symbol)))?;

    let usd = entry.pointer("/quote/USD").ok_or_else(|| {
        ProviderError::invalid_response(PROVIDER, format!("Missing USD quote for {}", symbol))
    })?;

    let price = usd
        .get("price")
        .and_then(Value::as_f64)
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| {
            ProviderError::invalid_response(PROVIDER, format!("Missing or invalid price for {}", symbol))
        })?;

    Ok(PriceQuote {
        symbol: symbol.to_string(),
        price,
        percent_change_24h: usd.get("percent_change_24h").and_then(Value::as_f64),
        fetched_at,
    })
}
