//! Immutable runtime configuration built once from the environment

use crate::error::ConfigError;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CMC_BASE_URL: &str = "https://pro-api.coinmarketcap.com";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

pub const MAX_RETENTION_DAYS: i64 = 3650;
pub const MAX_HORIZON_HOURS: i64 = 720;

/// Market-data (CoinMarketCap) client settings
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub api_key: String,
    pub base_url: Url,
    pub timeout: Duration,
    /// Total tries per request, the first one included.
    pub max_attempts: usize,
}

/// OpenAI-compatible chat-completions settings
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub timeout: Duration,
    pub max_attempts: usize,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// When set, every `/api` route requires a matching `X-API-Key` header.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub alert_interval_seconds: u64,
    pub alert_concurrency: usize,
    pub reconcile_interval_seconds: u64,
    pub forecast_horizon_hours: i64,
    pub price_retention_days: i64,
    pub notification_retention_days: i64,
    pub request_log_retention_days: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            alert_interval_seconds: 300,
            alert_concurrency: 4,
            reconcile_interval_seconds: 3600,
            forecast_horizon_hours: 24,
            price_retention_days: 30,
            notification_retention_days: 90,
            request_log_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub telegram_bot_token: Option<String>,
    pub market_data: MarketDataConfig,
    /// `None` disables `/forecast`.
    pub forecast: Option<ForecastConfig>,
    /// `None` selects in-memory storage, which only the api-server accepts.
    pub database_url: Option<String>,
    pub backend: BackendConfig,
    pub jobs: JobsConfig,
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timeout = Duration::from_secs(parse_or(&get, "PROVIDER_TIMEOUT_SECONDS", 5u64)?);
        let max_attempts = parse_in(&get, "PROVIDER_MAX_ATTEMPTS", 3usize, 1..=10)?;

        let market_data = MarketDataConfig {
            api_key: get("CMC_API_KEY")
                .or_else(|| get("COINMARKETCAP_API_KEY"))
                .ok_or(ConfigError::MissingVar("CMC_API_KEY"))?,
            base_url: parse_url(
                "CMC_BASE_URL",
                get("CMC_BASE_URL").as_deref().unwrap_or(DEFAULT_CMC_BASE_URL),
            )?,
            timeout,
            max_attempts,
        };

        let forecast = match get("LLM_API_KEY")
            .or_else(|| get("OPENAI_API_KEY"))
            .or_else(|| get("DEEPSEEK_API_KEY"))
        {
            Some(api_key) => Some(ForecastConfig {
                api_key,
                base_url: parse_url(
                    "LLM_BASE_URL",
                    get("LLM_BASE_URL").as_deref().unwrap_or(DEFAULT_LLM_BASE_URL),
                )?,
                model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                // Completions are slower than quotes.
                timeout: timeout * 3,
                max_attempts,
                max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 300u32)?,
            }),
            None => None,
        };

        let backend = BackendConfig {
            host: get("BACKEND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "BACKEND_PORT", 8000u16)?,
            api_key: get("API_KEY"),
        };

        let defaults = JobsConfig::default();
        let jobs = JobsConfig {
            alert_interval_seconds: parse_or(
                &get,
                "ALERT_INTERVAL_SECONDS",
                defaults.alert_interval_seconds,
            )?,
            alert_concurrency: parse_or(&get, "ALERT_CONCURRENCY", defaults.alert_concurrency)?
                .max(1),
            reconcile_interval_seconds: parse_or(
                &get,
                "RECONCILE_INTERVAL_SECONDS",
                defaults.reconcile_interval_seconds,
            )?,
            forecast_horizon_hours: parse_in(
                &get,
                "FORECAST_HORIZON_HOURS",
                defaults.forecast_horizon_hours,
                1..=MAX_HORIZON_HOURS,
            )?,
            price_retention_days: parse_in(
                &get,
                "PRICE_RETENTION_DAYS",
                defaults.price_retention_days,
                1..=MAX_RETENTION_DAYS,
            )?,
            notification_retention_days: parse_in(
                &get,
                "NOTIFICATION_RETENTION_DAYS",
                defaults.notification_retention_days,
                1..=MAX_RETENTION_DAYS,
            )?,
            request_log_retention_days: parse_in(
                &get,
                "REQUEST_LOG_RETENTION_DAYS",
                defaults.request_log_retention_days,
                1..=MAX_RETENTION_DAYS,
            )?,
        };

        Ok(Self {
            environment: get("ENVIRONMENT").unwrap_or_else(|| "sandbox".to_string()),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            market_data,
            forecast,
            database_url: get("DATABASE_URL"),
            backend,
            jobs,
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "prod")
    }

    pub fn require_bot_token(&self) -> Result<&str, ConfigError> {
        self.telegram_bot_token
            .as_deref()
            .ok_or(ConfigError::MissingVar("TELEGRAM_BOT_TOKEN"))
    }

    /// The bot and worker run as separate processes and must share one database.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingVar("DATABASE_URL"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.backend.host, self.backend.port)
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            reason: format!("`{}`: {}", raw, e),
        }),
        None => Ok(default),
    }
}

fn parse_in<T, G>(
    get: &G,
    var: &'static str,
    default: T,
    bounds: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, var, default)?;
    if !bounds.contains(&value) {
        return Err(ConfigError::InvalidValue {
            var,
            reason: format!(
                "{} is outside {}..={}",
                value,
                bounds.start(),
                bounds.end()
            ),
        });
    }
    Ok(value)
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        var,
        reason: format!("`{}`: {}", raw, e),
    })
}
