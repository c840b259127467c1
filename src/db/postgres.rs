//! Postgres-backed storage

use super::{PruneCutoffs, PruneReport, Storage, StorageResult};
use crate::error::PersistenceError;
use crate::models::{
    Condition, ConditionKind, DeliveryStatus, ForecastRecord, NewForecastRecord,
    NewNotificationLog, NewSubscription, NotificationLog, PricePoint, RequestLog, Subscription,
    SubscriptionUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS subscriptions (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        symbol TEXT NOT NULL,
        condition_kind TEXT NOT NULL,
        threshold DOUBLE PRECISION NOT NULL CHECK (threshold > 0),
        active BOOLEAN NOT NULL DEFAULT TRUE,
        armed BOOLEAN NOT NULL DEFAULT TRUE,
        reference_price DOUBLE PRECISION,
        last_price DOUBLE PRECISION,
        last_triggered_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (user_id, symbol)
    )",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_active ON subscriptions (active, symbol)",
    "CREATE TABLE IF NOT EXISTS price_history (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        price DOUBLE PRECISION NOT NULL,
        percent_change_24h DOUBLE PRECISION,
        source TEXT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_price_history_symbol_time ON price_history (symbol, recorded_at)",
    "CREATE TABLE IF NOT EXISTS forecast_history (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        predicted_price DOUBLE PRECISION NOT NULL,
        confidence DOUBLE PRECISION NOT NULL CHECK (confidence >= 0 AND confidence <= 1),
        rationale TEXT NOT NULL,
        base_price DOUBLE PRECISION NOT NULL,
        actual_price DOUBLE PRECISION,
        accuracy_score DOUBLE PRECISION,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        resolved_at TIMESTAMPTZ
    )",
    "CREATE INDEX IF NOT EXISTS idx_forecast_history_created ON forecast_history (created_at)",
    "CREATE TABLE IF NOT EXISTS notification_logs (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        symbol TEXT NOT NULL,
        kind TEXT NOT NULL,
        message TEXT NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        sent_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_notification_logs_user ON notification_logs (user_id, sent_at)",
    "CREATE TABLE IF NOT EXISTS request_logs (
        id BIGSERIAL PRIMARY KEY,
        request_id TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        client_host TEXT,
        query_params TEXT,
        request_body TEXT,
        response_body TEXT,
        status_code INTEGER NOT NULL,
        processing_time DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_request_id ON request_logs (request_id)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON request_logs (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_method ON request_logs (method)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_status_code ON request_logs (status_code)",
];

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, symbol, condition_kind, threshold, active, armed, \
     reference_price, last_price, last_triggered_at, created_at, updated_at";

const FORECAST_COLUMNS: &str = "id, symbol, predicted_price, confidence, rationale, base_price, \
     actual_price, accuracy_score, created_at, resolved_at";

const NOTIFICATION_COLUMNS: &str = "id, user_id, symbol, kind, message, status, error, sent_at";

pub struct PostgresDatabase {
    client: Client,
}

impl PostgresDatabase {
    /// Connect, spawn the connection driver and create missing tables.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| {
                PersistenceError::Unavailable(format!("Failed to connect to Postgres: {}", e))
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Postgres connection error");
            }
        });

        let db = Self { client };
        db.init_schema().await?;
        info!("Postgres schema ready");

        Ok(db)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            self.client
                .execute(*statement, &[])
                .await
                .map_err(|e| map_pg_error("create schema", e))?;
        }
        Ok(())
    }
}

fn map_pg_error(context: &str, e: tokio_postgres::Error) -> PersistenceError {
    if e.is_closed() {
        return PersistenceError::Unavailable(format!("{}: {}", context, e));
    }
    match e.code() {
        Some(code)
            if *code == SqlState::UNIQUE_VIOLATION
                || *code == SqlState::CHECK_VIOLATION
                || *code == SqlState::NOT_NULL_VIOLATION
                || *code == SqlState::FOREIGN_KEY_VIOLATION =>
        {
            PersistenceError::Constraint(format!("{}: {}", context, e))
        }
        _ => PersistenceError::Query(format!("{}: {}", context, e)),
    }
}

fn column<'a, T>(row: &'a Row, name: &str) -> StorageResult<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name)
        .map_err(|e| PersistenceError::Query(format!("Failed to read column {}: {}", name, e)))
}

fn subscription_from_row(row: &Row) -> StorageResult<Subscription> {
    let kind: String = column(row, "condition_kind")?;
    let kind = ConditionKind::parse(&kind)
        .ok_or_else(|| PersistenceError::Query(format!("Unknown condition kind {}", kind)))?;

    Ok(Subscription {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        symbol: column(row, "symbol")?,
        condition: Condition {
            kind,
            threshold: column(row, "threshold")?,
        },
        active: column(row, "active")?,
        armed: column(row, "armed")?,
        reference_price: column(row, "reference_price")?,
        last_price: column(row, "last_price")?,
        last_triggered_at: column(row, "last_triggered_at")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn forecast_from_row(row: &Row) -> StorageResult<ForecastRecord> {
    Ok(ForecastRecord {
        id: column(row, "id")?,
        symbol: column(row, "symbol")?,
        predicted_price: column(row, "predicted_price")?,
        confidence: column(row, "confidence")?,
        rationale: column(row, "rationale")?,
        base_price: column(row, "base_price")?,
        actual_price: column(row, "actual_price")?,
        accuracy_score: column(row, "accuracy_score")?,
        created_at: column(row, "created_at")?,
        resolved_at: column(row, "resolved_at")?,
    })
}

fn notification_from_row(row: &Row) -> StorageResult<NotificationLog> {
    let status: String = column(row, "status")?;
    Ok(NotificationLog {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        symbol: column(row, "symbol")?,
        kind: column(row, "kind")?,
        message: column(row, "message")?,
        status: DeliveryStatus::parse(&status),
        error: column(row, "error")?,
        sent_at: column(row, "sent_at")?,
    })
}

fn price_from_row(row: &Row) -> StorageResult<PricePoint> {
    Ok(PricePoint {
        id: Some(column(row, "id")?),
        symbol: column(row, "symbol")?,
        price: column(row, "price")?,
        percent_change_24h: column(row, "percent_change_24h")?,
        source: column(row, "source")?,
        recorded_at: column(row, "recorded_at")?,
    })
}

#[async_trait]
impl Storage for PostgresDatabase {
    async fn upsert_subscription(&self, new: &NewSubscription) -> StorageResult<Subscription> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO subscriptions
                 (user_id, symbol, condition_kind, threshold, reference_price, active, armed, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, TRUE, TRUE, $6, $6)
             ON CONFLICT (user_id, symbol) DO UPDATE SET
                 condition_kind = EXCLUDED.condition_kind,
                 threshold = EXCLUDED.threshold,
                 reference_price = EXCLUDED.reference_price,
                 active = TRUE,
                 armed = TRUE,
                 last_triggered_at = NULL,
                 updated_at = EXCLUDED.updated_at
             RETURNING {}",
            SUBSCRIPTION_COLUMNS
        );

        let row = self
            .client
            .query_one(
                &query,
                &[
                    &new.user_id,
                    &new.symbol,
                    &new.condition.kind.as_str(),
                    &new.condition.threshold,
                    &new.reference_price,
                    &now,
                ],
            )
            .await
            .map_err(|e| map_pg_error("upsert subscription", e))?;

        subscription_from_row(&row)
    }

    async fn deactivate_subscription(&self, user_id: i64, symbol: &str) -> StorageResult<bool> {
        let affected = self
            .client
            .execute(
                "UPDATE subscriptions SET active = FALSE, updated_at = $3
                 WHERE user_id = $1 AND symbol = $2 AND active",
                &[&user_id, &symbol, &Utc::now()],
            )
            .await
            .map_err(|e| map_pg_error("deactivate subscription", e))?;

        Ok(affected > 0)
    }

    async fn active_subscriptions(&self) -> StorageResult<Vec<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE active ORDER BY symbol, id",
            SUBSCRIPTION_COLUMNS
        );
        let rows = self
            .client
            .query(&query, &[])
            .await
            .map_err(|e| map_pg_error("query active subscriptions", e))?;

        rows.iter().map(subscription_from_row).collect()
    }

    async fn user_subscriptions(&self, user_id: i64) -> StorageResult<Vec<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND active ORDER BY symbol",
            SUBSCRIPTION_COLUMNS
        );
        let rows = self
            .client
            .query(&query, &[&user_id])
            .await
            .map_err(|e| map_pg_error("query user subscriptions", e))?;

        rows.iter().map(subscription_from_row).collect()
    }

    async fn record_evaluation(
        &self,
        id: i64,
        loaded_updated_at: DateTime<Utc>,
        update: &SubscriptionUpdate,
    ) -> StorageResult<bool> {
        let affected = self
            .client
            .execute(
                "UPDATE subscriptions
                 SET armed = $2, reference_price = $3, last_price = $4,
                     last_triggered_at = $5, updated_at = $6
                 WHERE id = $1 AND updated_at = $7",
                &[
                    &id,
                    &update.armed,
                    &update.reference_price,
                    &update.last_price,
                    &update.last_triggered_at,
                    &update.updated_at,
                    &loaded_updated_at,
                ],
            )
            .await
            .map_err(|e| map_pg_error("record evaluation", e))?;
        if affected > 0 {
            return Ok(true);
        }

        let exists = self
            .client
            .query_opt("SELECT 1 FROM subscriptions WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg_error("record evaluation", e))?;
        match exists {
            Some(_) => Ok(false),
            None => Err(PersistenceError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            }),
        }
    }

    async fn store_price(&self, point: &PricePoint) -> StorageResult<()> {
        self.client
            .execute(
                "INSERT INTO price_history (symbol, price, percent_change_24h, source, recorded_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &point.symbol,
                    &point.price,
                    &point.percent_change_24h,
                    &point.source,
                    &point.recorded_at,
                ],
            )
            .await
            .map_err(|e| map_pg_error("store price", e))?;

        debug!(symbol = %point.symbol, price = point.price, "Stored price point");
        Ok(())
    }

    async fn price_history(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PricePoint>> {
        let rows = self
            .client
            .query(
                "SELECT id, symbol, price, percent_change_24h, source, recorded_at
                 FROM price_history
                 WHERE symbol = $1 AND recorded_at >= $2
                 ORDER BY recorded_at ASC",
                &[&symbol, &since],
            )
            .await
            .map_err(|e| map_pg_error("query price history", e))?;

        rows.iter().map(price_from_row).collect()
    }

    async fn store_forecast(&self, record: &NewForecastRecord) -> StorageResult<ForecastRecord> {
        let query = format!(
            "INSERT INTO forecast_history
                 (symbol, predicted_price, confidence, rationale, base_price, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            FORECAST_COLUMNS
        );
        let row = self
            .client
            .query_one(
                &query,
                &[
                    &record.symbol,
                    &record.forecast.predicted_price,
                    &record.forecast.confidence,
                    &record.forecast.rationale,
                    &record.base_price,
                    &record.created_at,
                ],
            )
            .await
            .map_err(|e| map_pg_error("store forecast", e))?;

        forecast_from_row(&row)
    }

    async fn recent_forecasts(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ForecastRecord>> {
        let limit = limit as i64;
        let rows = match symbol {
            Some(symbol) => {
                let query = format!(
                    "SELECT {} FROM forecast_history WHERE symbol = $1
                     ORDER BY created_at DESC LIMIT $2",
                    FORECAST_COLUMNS
                );
                self.client.query(&query, &[&symbol, &limit]).await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM forecast_history ORDER BY created_at DESC LIMIT $1",
                    FORECAST_COLUMNS
                );
                self.client.query(&query, &[&limit]).await
            }
        }
        .map_err(|e| map_pg_error("query forecasts", e))?;

        rows.iter().map(forecast_from_row).collect()
    }

    async fn unresolved_forecasts(
        &self,
        created_before: DateTime<Utc>,
    ) -> StorageResult<Vec<ForecastRecord>> {
        let query = format!(
            "SELECT {} FROM forecast_history
             WHERE actual_price IS NULL AND created_at < $1
             ORDER BY created_at ASC",
            FORECAST_COLUMNS
        );
        let rows = self
            .client
            .query(&query, &[&created_before])
            .await
            .map_err(|e| map_pg_error("query unresolved forecasts", e))?;

        rows.iter().map(forecast_from_row).collect()
    }

    async fn resolve_forecast(
        &self,
        id: i64,
        actual_price: f64,
        accuracy_score: f64,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let affected = self
            .client
            .execute(
                "UPDATE forecast_history
                 SET actual_price = $2, accuracy_score = $3, resolved_at = $4
                 WHERE id = $1",
                &[&id, &actual_price, &accuracy_score, &resolved_at],
            )
            .await
            .map_err(|e| map_pg_error("resolve forecast", e))?;

        if affected == 0 {
            return Err(PersistenceError::NotFound {
                entity: "forecast",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn store_notification(
        &self,
        log: &NewNotificationLog,
    ) -> StorageResult<NotificationLog> {
        let query = format!(
            "INSERT INTO notification_logs (user_id, symbol, kind, message, status, error, sent_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            NOTIFICATION_COLUMNS
        );
        let row = self
            .client
            .query_one(
                &query,
                &[
                    &log.user_id,
                    &log.symbol,
                    &log.kind,
                    &log.message,
                    &log.status.as_str(),
                    &log.error,
                    &log.sent_at,
                ],
            )
            .await
            .map_err(|e| map_pg_error("store notification", e))?;

        notification_from_row(&row)
    }

    async fn user_notifications(
        &self,
        user_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<NotificationLog>> {
        let query = format!(
            "SELECT {} FROM notification_logs WHERE user_id = $1
             ORDER BY sent_at DESC LIMIT $2",
            NOTIFICATION_COLUMNS
        );
        let rows = self
            .client
            .query(&query, &[&user_id, &(limit as i64)])
            .await
            .map_err(|e| map_pg_error("query notifications", e))?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn store_request_log(&self, log: &RequestLog) -> StorageResult<()> {
        self.client
            .execute(
                "INSERT INTO request_logs
                     (request_id, timestamp, method, url, client_host, query_params,
                      request_body, response_body, status_code, processing_time)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &log.request_id,
                    &log.timestamp,
                    &log.method,
                    &log.url,
                    &log.client_host,
                    &log.query_params,
                    &log.request_body,
                    &log.response_body,
                    &log.status_code,
                    &log.processing_time,
                ],
            )
            .await
            .map_err(|e| map_pg_error("store request log", e))?;

        Ok(())
    }

    async fn prune(&self, cutoffs: &PruneCutoffs) -> StorageResult<PruneReport> {
        let price_points = self
            .client
            .execute(
                "DELETE FROM price_history WHERE recorded_at < $1",
                &[&cutoffs.prices_before],
            )
            .await
            .map_err(|e| map_pg_error("prune price history", e))?;

        let notifications = self
            .client
            .execute(
                "DELETE FROM notification_logs WHERE sent_at < $1",
                &[&cutoffs.notifications_before],
            )
            .await
            .map_err(|e| map_pg_error("prune notification logs", e))?;

        let request_logs = self
            .client
            .execute(
                "DELETE FROM request_logs WHERE timestamp < $1",
                &[&cutoffs.request_logs_before],
            )
            .await
            .map_err(|e| map_pg_error("prune request logs", e))?;

        Ok(PruneReport {
            price_points,
            notifications,
            request_logs,
        })
    }
}
