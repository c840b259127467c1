//! Short-term price forecasts from an OpenAI-compatible chat-completions API

use crate::config::ForecastConfig;
use crate::error::ProviderError;
use crate::models::{Forecast, PricePoint, PriceQuote};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER: &str = "llm";

/// History lines beyond this are dropped from the prompt, oldest first.
const MAX_PROMPT_POINTS: usize = 48;

const SYSTEM_PROMPT: &str = "You are a cryptocurrency market analyst. Analyze the price \
history and provide a short-term forecast. Reply with a single JSON object of the form \
{\"predicted_price\": number, \"confidence\": number between 0 and 1, \"rationale\": string} \
and nothing else.";

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(
        &self,
        symbol: &str,
        current: &PriceQuote,
        history: &[PricePoint],
    ) -> Result<Forecast, ProviderError>;
}

pub struct LlmForecastClient {
    http: reqwest::Client,
    api_key: String,
    completions_url: String,
    model: String,
    max_tokens: u32,
    horizon_hours: i64,
    max_attempts: usize,
    retry_delay: Duration,
}

impl LlmForecastClient {
    pub fn new(config: &ForecastConfig, horizon_hours: i64) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::network(PROVIDER, format!("Failed to build client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            completions_url: format!(
                "{}/chat/completions",
                config.base_url.as_str().trim_end_matches('/')
            ),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            horizon_hours,
            max_attempts: config.max_attempts,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": self.max_tokens,
            "temperature": 0.2,
        });

        let response = self
            .http
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::rate_limited(PROVIDER, "completion rate limited"));
        }
        if status.is_server_error() {
            return Err(ProviderError::network(
                PROVIDER,
                format!("HTTP {}", status.as_u16()),
            ));
        }
        if !status.is_success() {
            return Err(ProviderError::invalid_response(
                PROVIDER,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body: Value = response.json().await.map_err(|e| {
            ProviderError::invalid_response(PROVIDER, format!("Failed to parse response: {}", e))
        })?;

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response(PROVIDER, "Missing completion content"))
    }
}

#[async_trait]
impl ForecastProvider for LlmForecastClient {
    async fn forecast(
        &self,
        symbol: &str,
        current: &PriceQuote,
        history: &[PricePoint],
    ) -> Result<Forecast, ProviderError> {
        let prompt = build_prompt(symbol, current, history, self.horizon_hours);

        let content = (|| async { self.complete_once(&prompt).await })
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
                    "Forecast request failed, retrying"
                );
            })
            .await?;

        let forecast = parse_forecast(&content)?;
        debug!(
            symbol = %symbol,
            predicted_price = forecast.predicted_price,
            confidence = forecast.confidence,
            "Parsed forecast"
        );
        Ok(forecast)
    }
}

/// Prompt listing the stored history, or only the current quote when none is stored.
pub fn build_prompt(
    symbol: &str,
    current: &PriceQuote,
    history: &[PricePoint],
    horizon_hours: i64,
) -> String {
    let mut prompt = format!(
        "Analyze this price history for {} and provide a forecast for the next {} hours.\n",
        symbol, horizon_hours
    );

    let skip = history.len().saturating_sub(MAX_PROMPT_POINTS);
    if history.is_empty() {
        prompt.push_str("No stored history is available.\n");
    } else {
        for point in history.iter().skip(skip) {
            prompt.push_str(&format!(
                "{}: ${:.2}\n",
                point.recorded_at.format("%Y-%m-%d %H:%M UTC"),
                point.price
            ));
        }
    }

    prompt.push_str(&format!(
        "Current price: ${:.2} ({})",
        current.price,
        current
            .percent_change_24h
            .map(|c| format!("{:+.2}% over 24h", c))
            .unwrap_or_else(|| "24h change unknown".to_string())
    ));
    prompt
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Parse and validate the JSON object embedded in a completion.
///
/// Prose around the object, such as a markdown code fence, is ignored.
pub fn parse_forecast(content: &str) -> Result<Forecast, ProviderError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(ProviderError::invalid_response(
                PROVIDER,
                "Completion contains no JSON object",
            ))
        }
    };

    let value: Value = serde_json::from_str(json).map_err(|e| {
        ProviderError::invalid_response(PROVIDER, format!("Malformed forecast JSON: {}", e))
    })?;

    let predicted_price = number(value.get("predicted_price"))
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| {
            ProviderError::invalid_response(PROVIDER, "predicted_price must be a positive number")
        })?;

    let confidence = number(value.get("confidence"))
        .filter(|c| (0.0..=1.0).contains(c))
        .ok_or_else(|| {
            ProviderError::invalid_response(PROVIDER, "confidence must be a number within [0, 1]")
        })?;

    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .map(|r| r.trim().to_string())
        .unwrap_or_default();

    Ok(Forecast {
        predicted_price,
        confidence,
        rationale,
    })
}
