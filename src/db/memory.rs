//! In-process storage used when no database is configured, and by tests

use super::{PruneCutoffs, PruneReport, Storage, StorageResult};
use crate::error::PersistenceError;
use crate::models::{
    ForecastRecord, NewForecastRecord, NewNotificationLog, NewSubscription, NotificationLog,
    PricePoint, RequestLog, Subscription, SubscriptionUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Request logs kept in memory; the oldest are dropped first.
pub const REQUEST_LOG_CAPACITY: usize = 10_000;

#[derive(Default)]
struct Tables {
    subscriptions: Vec<Subscription>,
    prices: Vec<PricePoint>,
    forecasts: Vec<ForecastRecord>,
    notifications: Vec<NotificationLog>,
    requests: VecDeque<RequestLog>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored request log, oldest first.
    pub async fn request_logs(&self) -> Vec<RequestLog> {
        self.tables.read().await.requests.iter().cloned().collect()
    }

    /// Snapshot of every stored price point, oldest first.
    pub async fn price_points(&self) -> Vec<PricePoint> {
        self.tables.read().await.prices.clone()
    }

    /// Snapshot of every notification log row, oldest first.
    pub async fn notification_logs(&self) -> Vec<NotificationLog> {
        self.tables.read().await.notifications.clone()
    }
}

#[async_trait]
impl Storage for MemoryDatabase {
    async fn upsert_subscription(&self, new: &NewSubscription) -> StorageResult<Subscription> {
        if !new.condition.threshold.is_finite() || new.condition.threshold <= 0.0 {
            return Err(PersistenceError::Constraint(format!(
                "threshold {} must be positive",
                new.condition.threshold
            )));
        }

        let now = Utc::now();
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.user_id == new.user_id && s.symbol == new.symbol)
        {
            existing.condition = new.condition;
            existing.reference_price = new.reference_price;
            existing.active = true;
            existing.armed = true;
            existing.last_triggered_at = None;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let id = tables.next_id();
        let subscription = Subscription {
            id,
            user_id: new.user_id,
            symbol: new.symbol.clone(),
            condition: new.condition,
            active: true,
            armed: true,
            reference_price: new.reference_price,
            last_price: None,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn deactivate_subscription(&self, user_id: i64, symbol: &str) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        match tables
            .subscriptions
            .iter_mut()
            .find(|s| s.user_id == user_id && s.symbol == symbol && s.active)
        {
            Some(subscription) => {
                subscription.active = false;
                subscription.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn active_subscriptions(&self) -> StorageResult<Vec<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn user_subscriptions(&self, user_id: i64) -> StorageResult<Vec<Subscription>> {
        let tables = self.tables.read().await;
        let mut subscriptions: Vec<Subscription> = tables
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.active)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(subscriptions)
    }

    async fn record_evaluation(
        &self,
        id: i64,
        loaded_updated_at: DateTime<Utc>,
        update: &SubscriptionUpdate,
    ) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        let subscription = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| PersistenceError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            })?;
        if subscription.updated_at != loaded_updated_at {
            return Ok(false);
        }

        subscription.armed = update.armed;
        subscription.reference_price = update.reference_price;
        subscription.last_price = Some(update.last_price);
        subscription.last_triggered_at = update.last_triggered_at;
        subscription.updated_at = update.updated_at;
        Ok(true)
    }

    async fn store_price(&self, point: &PricePoint) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let mut point = point.clone();
        point.id = Some(id);
        tables.prices.push(point);
        Ok(())
    }

    async fn price_history(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PricePoint>> {
        let tables = self.tables.read().await;
        let mut points: Vec<PricePoint> = tables
            .prices
            .iter()
            .filter(|p| p.symbol == symbol && p.recorded_at >= since)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.recorded_at);
        Ok(points)
    }

    async fn store_forecast(&self, record: &NewForecastRecord) -> StorageResult<ForecastRecord> {
        let confidence = record.forecast.confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(PersistenceError::Constraint(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }

        let mut tables = self.tables.write().await;
        let stored = ForecastRecord {
            id: tables.next_id(),
            symbol: record.symbol.clone(),
            predicted_price: record.forecast.predicted_price,
            confidence,
            rationale: record.forecast.rationale.clone(),
            base_price: record.base_price,
            actual_price: None,
            accuracy_score: None,
            created_at: record.created_at,
            resolved_at: None,
        };
        tables.forecasts.push(stored.clone());
        Ok(stored)
    }

    async fn recent_forecasts(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ForecastRecord>> {
        let tables = self.tables.read().await;
        let mut forecasts: Vec<ForecastRecord> = tables
            .forecasts
            .iter()
            .filter(|f| symbol.map_or(true, |symbol| f.symbol == symbol))
            .cloned()
            .collect();
        forecasts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        forecasts.truncate(limit);
        Ok(forecasts)
    }

    async fn unresolved_forecasts(
        &self,
        created_before: DateTime<Utc>,
    ) -> StorageResult<Vec<ForecastRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .forecasts
            .iter()
            .filter(|f| f.actual_price.is_none() && f.created_at < created_before)
            .cloned()
            .collect())
    }

    async fn resolve_forecast(
        &self,
        id: i64,
        actual_price: f64,
        accuracy_score: f64,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let forecast = tables
            .forecasts
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| PersistenceError::NotFound {
                entity: "forecast",
                id: id.to_string(),
            })?;

        forecast.actual_price = Some(actual_price);
        forecast.accuracy_score = Some(accuracy_score);
        forecast.resolved_at = Some(resolved_at);
        Ok(())
    }

    async fn store_notification(
        &self,
        log: &NewNotificationLog,
    ) -> StorageResult<NotificationLog> {
        let mut tables = self.tables.write().await;
        let stored = NotificationLog {
            id: tables.next_id(),
            user_id: log.user_id,
            symbol: log.symbol.clone(),
            kind: log.kind.clone(),
            message: log.message.clone(),
            status: log.status,
            error: log.error.clone(),
            sent_at: log.sent_at,
        };
        tables.notifications.push(stored.clone());
        Ok(stored)
    }

    async fn user_notifications(
        &self,
        user_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<NotificationLog>> {
        let tables = self.tables.read().await;
        let mut logs: Vec<NotificationLog> = tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then(b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn store_request_log(&self, log: &RequestLog) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.requests.len() >= REQUEST_LOG_CAPACITY {
            tables.requests.pop_front();
        }
        tables.requests.push_back(log.clone());
        Ok(())
    }

    async fn prune(&self, cutoffs: &PruneCutoffs) -> StorageResult<PruneReport> {
        let mut tables = self.tables.write().await;

        let prices = tables.prices.len();
        tables.prices.retain(|p| p.recorded_at >= cutoffs.prices_before);
        let notifications = tables.notifications.len();
        tables
            .notifications
            .retain(|n| n.sent_at >= cutoffs.notifications_before);
        let requests = tables.requests.len();
        tables
            .requests
            .retain(|r| r.timestamp >= cutoffs.request_logs_before);

        Ok(PruneReport {
            price_points: (prices - tables.prices.len()) as u64,
            notifications: (notifications - tables.notifications.len()) as u64,
            request_logs: (requests - tables.requests.len()) as u64,
        })
    }
}
