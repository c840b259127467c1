//! Forecast accuracy back-fill and data retention

use crate::core::scheduler::ScheduledJob;
use crate::config::JobsConfig;
use crate::db::{retry_write, PruneCutoffs, PruneReport};
use crate::error::Result;
use crate::jobs::context::JobContext;
use crate::models::{accuracy_score, ForecastRecord};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub resolved: usize,
    pub skipped: usize,
}

/// Fills in `actual_price` and `accuracy_score` once a forecast's horizon has passed.
pub struct ForecastReconcileJob {
    ctx: Arc<JobContext>,
    horizon: Duration,
}

impl ForecastReconcileJob {
    pub fn new(ctx: Arc<JobContext>, horizon_hours: i64) -> Self {
        Self {
            ctx,
            horizon: Duration::hours(horizon_hours),
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let now = Utc::now();
        let due = self
            .ctx
            .storage
            .unresolved_forecasts(now - self.horizon)
            .await?;

        let mut by_symbol: BTreeMap<String, Vec<ForecastRecord>> = BTreeMap::new();
        for forecast in due {
            by_symbol.entry(forecast.symbol.clone()).or_default().push(forecast);
        }

        let mut report = ReconcileReport::default();
        for (symbol, forecasts) in by_symbol {
            let actual = match self.ctx.prices.quote(&symbol).await {
                Ok(quote) => quote.price,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Cannot resolve forecasts without a price");
                    report.skipped += forecasts.len();
                    continue;
                }
            };

            for forecast in forecasts {
                let score = accuracy_score(forecast.predicted_price, actual);
                match retry_write("resolve_forecast", || {
                    self.ctx
                        .storage
                        .resolve_forecast(forecast.id, actual, score, now)
                })
                .await
                {
                    Ok(()) => report.resolved += 1,
                    Err(e) => {
                        warn!(forecast_id = forecast.id, error = %e, "Failed to resolve forecast");
                        report.skipped += 1;
                    }
                }
            }
        }

        if report.resolved > 0 || report.skipped > 0 {
            info!(
                resolved = report.resolved,
                skipped = report.skipped,
                "Forecast reconciliation complete"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl ScheduledJob for ForecastReconcileJob {
    fn name(&self) -> &'static str {
        "forecast-reconcile"
    }

    async fn run(&self) -> Result<()> {
        self.reconcile().await.map(|_| ())
    }
}

/// Deletes price history, notification logs and request logs past their retention window.
pub struct RetentionJob {
    ctx: Arc<JobContext>,
    price_retention: Duration,
    notification_retention: Duration,
    request_log_retention: Duration,
}

impl RetentionJob {
    /// Retention days are bounded by `Config`, so the durations cannot overflow.
    pub fn new(ctx: Arc<JobContext>, jobs: &JobsConfig) -> Self {
        Self {
            ctx,
            price_retention: Duration::days(jobs.price_retention_days),
            notification_retention: Duration::days(jobs.notification_retention_days),
            request_log_retention: Duration::days(jobs.request_log_retention_days),
        }
    }

    pub async fn prune(&self) -> Result<PruneReport> {
        let now = Utc::now();
        let cutoffs = PruneCutoffs {
            prices_before: now - self.price_retention,
            notifications_before: now - self.notification_retention,
            request_logs_before: now - self.request_log_retention,
        };
        let report = self.ctx.storage.prune(&cutoffs).await?;

        info!(
            price_points = report.price_points,
            notifications = report.notifications,
            request_logs = report.request_logs,
            "Retention pass complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl ScheduledJob for RetentionJob {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn run(&self) -> Result<()> {
        self.prune().await.map(|_| ())
    }
}
