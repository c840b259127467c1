//! Error taxonomy shared by providers, storage, delivery and command handling

use std::fmt;
use thiserror::Error;

/// Classification of upstream provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    NotFound,
    Network,
    InvalidResponse,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::NotFound => "not_found",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by the price and forecast clients
#[derive(Error, Debug, Clone)]
#[error("{provider} {kind}: {message}")]
pub struct ProviderError {
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: &'static str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::RateLimited, message)
    }

    pub fn not_found(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::NotFound, message)
    }

    pub fn network(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Network, message)
    }

    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::InvalidResponse, message)
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited | ProviderErrorKind::Network
        )
    }
}

/// Chat delivery failures
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("chat {user_id} rejected message: {reason}")]
    Rejected { user_id: i64, reason: String },

    #[error("delivery to chat {user_id} failed: {reason}")]
    Transport { user_id: i64, reason: String },
}

/// Storage failures
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("query failed: {0}")]
    Query(String),
}

/// Malformed user input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid symbol `{0}`: use 2-5 letters, e.g. BTC")]
    InvalidSymbol(String),

    #[error("invalid condition `{0}`: use `above <price>`, `below <price>` or `change <percent>`")]
    InvalidCondition(String),

    #[error("missing argument `{0}`")]
    MissingArgument(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unknown command `{0}`")]
    UnknownCommand(String),
}

/// Startup configuration failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
