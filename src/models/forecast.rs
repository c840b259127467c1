//! Forecasts produced by the language model and their stored history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validated forecast parsed from a model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub predicted_price: f64,
    /// Always within [0, 1].
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewForecastRecord {
    pub symbol: String,
    pub forecast: Forecast,
    /// Price at the time the forecast was requested.
    pub base_price: f64,
    pub created_at: DateTime<Utc>,
}

/// A row of `forecast_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub id: i64,
    pub symbol: String,
    pub predicted_price: f64,
    pub confidence: f64,
    pub rationale: String,
    pub base_price: f64,
    pub actual_price: Option<f64>,
    pub accuracy_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// 1.0 for an exact hit, falling linearly with relative error and floored at 0.
pub fn accuracy_score(predicted: f64, actual: f64) -> f64 {
    if actual <= 0.0 || !predicted.is_finite() {
        return 0.0;
    }
    (1.0 - (predicted - actual).abs() / actual).clamp(0.0, 1.0)
}
