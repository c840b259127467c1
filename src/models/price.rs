//! Price quotes and stored price history

use crate::models::subscription::percent_change;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest price as returned by the market-data provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: f64,
    pub percent_change_24h: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

/// A price observation persisted in `price_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub symbol: String,
    pub price: f64,
    pub percent_change_24h: Option<f64>,
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

impl PricePoint {
    pub fn from_quote(quote: &PriceQuote, source: &str) -> Self {
        Self {
            id: None,
            symbol: quote.symbol.clone(),
            price: quote.price,
            percent_change_24h: quote.percent_change_24h,
            source: source.to_string(),
            recorded_at: quote.fetched_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

/// Moves smaller than this many percent over the window count as neutral.
pub const TREND_THRESHOLD_PCT: f64 = 2.0;

impl Trend {
    /// Classify a window of observations ordered oldest first.
    pub fn from_history(history: &[PricePoint]) -> Self {
        let (Some(first), Some(last)) = (history.first(), history.last()) else {
            return Trend::Neutral;
        };
        if history.len() < 2 || first.price <= 0.0 {
            return Trend::Neutral;
        }

        let change = percent_change(first.price, last.price);
        if change > TREND_THRESHOLD_PCT {
            Trend::Up
        } else if change < -TREND_THRESHOLD_PCT {
            Trend::Down
        } else {
            Trend::Neutral
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Up => f.write_str("up 📈"),
            Trend::Down => f.write_str("down 📉"),
            Trend::Neutral => f.write_str("neutral ➡️"),
        }
    }
}
