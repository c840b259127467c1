//! Persistence layer: subscriptions, price/forecast history, notification and request logs

pub mod memory;
pub mod postgres;

pub use memory::MemoryDatabase;
pub use postgres::PostgresDatabase;

use crate::error::PersistenceError;
use crate::models::{
    ForecastRecord, NewForecastRecord, NewNotificationLog, NewSubscription, NotificationLog,
    PricePoint, RequestLog, Subscription, SubscriptionUpdate,
};
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub type StorageResult<T> = Result<T, PersistenceError>;

/// Rows removed by a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub price_points: u64,
    pub notifications: u64,
    pub request_logs: u64,
}

/// Rows older than these instants are removed by `Storage::prune`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneCutoffs {
    pub prices_before: DateTime<Utc>,
    pub notifications_before: DateTime<Utc>,
    pub request_logs_before: DateTime<Utc>,
}

/// Relational store used by the bot, the HTTP backend and the background jobs.
///
/// Every write touches a single row, so implementations rely on row-level
/// atomicity only.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace the user's subscription on a symbol, re-activating and re-arming it.
    async fn upsert_subscription(&self, new: &NewSubscription) -> StorageResult<Subscription>;

    /// Returns `false` when the user had no active subscription on the symbol.
    async fn deactivate_subscription(&self, user_id: i64, symbol: &str) -> StorageResult<bool>;

    async fn active_subscriptions(&self) -> StorageResult<Vec<Subscription>>;

    async fn user_subscriptions(&self, user_id: i64) -> StorageResult<Vec<Subscription>>;

    /// Persist an evaluation computed from the row as loaded at `loaded_updated_at`.
    ///
    /// Returns `false` without writing when the row changed since it was loaded,
    /// e.g. the user re-subscribed or unsubscribed mid-tick.
    async fn record_evaluation(
        &self,
        id: i64,
        loaded_updated_at: DateTime<Utc>,
        update: &SubscriptionUpdate,
    ) -> StorageResult<bool>;

    async fn store_price(&self, point: &PricePoint) -> StorageResult<()>;

    /// Observations for `symbol` recorded at or after `since`, oldest first.
    async fn price_history(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PricePoint>>;

    async fn store_forecast(&self, record: &NewForecastRecord) -> StorageResult<ForecastRecord>;

    /// Newest first.
    async fn recent_forecasts(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ForecastRecord>>;

    /// Forecasts created before `created_before` that have no actual price yet.
    async fn unresolved_forecasts(
        &self,
        created_before: DateTime<Utc>,
    ) -> StorageResult<Vec<ForecastRecord>>;

    async fn resolve_forecast(
        &self,
        id: i64,
        actual_price: f64,
        accuracy_score: f64,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    async fn store_notification(&self, log: &NewNotificationLog)
        -> StorageResult<NotificationLog>;

    /// Newest first.
    async fn user_notifications(
        &self,
        user_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<NotificationLog>>;

    async fn store_request_log(&self, log: &RequestLog) -> StorageResult<()>;

    async fn prune(&self, cutoffs: &PruneCutoffs) -> StorageResult<PruneReport>;
}

/// Run a write, retrying it once after a short pause unless the failure is permanent.
pub async fn retry_write<T, F, Fut>(operation: &'static str, write: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    write
        .retry(
            ConstantBuilder::default()
                .with_delay(Duration::from_millis(200))
                .with_max_times(1),
        )
        .when(|e| {
            !matches!(
                e,
                PersistenceError::Constraint(_) | PersistenceError::NotFound { .. }
            )
        })
        .notify(|e, delay| {
            warn!(
                operation = operation,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Storage write failed, retrying once"
            );
        })
        .await
}
