//! Cron-based scheduler that drives a background job on a fixed interval

use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// A unit of periodic work
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Process-owned timer for one job.
///
/// Each tick runs to completion before the next is scheduled, so runs never
/// overlap; ticks that fall due while a run is in progress are skipped.
pub struct JobScheduler {
    job: Arc<dyn ScheduledJob>,
    schedule: Schedule,
    cron_expr: String,
    handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

/// Convert an interval to a six-field cron expression
/// (second minute hour day month weekday).
///
/// A cron step only yields evenly spaced ticks when it divides its field, so
/// the interval must be a divisor of 60 seconds, of 60 minutes or of 24 hours.
pub fn cron_expression(interval_seconds: u64) -> std::result::Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        var: "interval_seconds",
        reason,
    };

    if interval_seconds == 0 {
        return Err(invalid("scheduler interval must be positive".to_string()));
    }

    let (minutes, hours) = (interval_seconds / 60, interval_seconds / 3600);
    let expr = if interval_seconds < 60 && 60 % interval_seconds == 0 {
        format!("*/{} * * * * *", interval_seconds)
    } else if interval_seconds % 60 == 0 && minutes < 60 && 60 % minutes == 0 {
        format!("0 */{} * * * *", minutes)
    } else if interval_seconds == 86400 {
        "0 0 0 * * *".to_string()
    } else if interval_seconds % 3600 == 0 && hours < 24 && 24 % hours == 0 {
        format!("0 0 */{} * * *", hours)
    } else {
        return Err(invalid(format!(
            "{}s does not evenly divide a minute, an hour or a day",
            interval_seconds
        )));
    };
    Ok(expr)
}

impl JobScheduler {
    pub fn new(
        job: Arc<dyn ScheduledJob>,
        interval_seconds: u64,
    ) -> std::result::Result<Self, ConfigError> {
        let cron_expr = cron_expression(interval_seconds)?;
        let schedule = Schedule::from_str(&cron_expr).map_err(|e| ConfigError::InvalidValue {
            var: "interval_seconds",
            reason: format!("invalid cron expression '{}': {}", cron_expr, e),
        })?;

        info!(
            job = job.name(),
            interval = interval_seconds,
            cron = %cron_expr,
            "JobScheduler: created"
        );

        Ok(Self {
            job,
            schedule,
            cron_expr,
            handle: Arc::new(RwLock::new(None)),
        })
    }

    pub fn cron_expr(&self) -> &str {
        &self.cron_expr
    }

    /// Start ticking. Calling `start` on a running scheduler is a no-op.
    pub async fn start(&self) {
        let mut slot = self.handle.write().await;
        if slot.is_some() {
            debug!(job = self.job.name(), "JobScheduler: already running");
            return;
        }

        let job = self.job.clone();
        let schedule = self.schedule.clone();

        let handle = tokio::spawn(async move {
            info!(job = job.name(), "JobScheduler: started, waiting for cron schedule...");

            loop {
                let Some(next_tick) = schedule.upcoming(chrono::Utc).next() else {
                    tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
                    continue;
                };
                let now = chrono::Utc::now();
                if next_tick > now {
                    let duration = (next_tick - now).to_std().unwrap_or_default();
                    tokio::time::sleep(duration).await;
                }

                let started = Instant::now();
                match job.run().await {
                    Ok(()) => debug!(
                        job = job.name(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "JobScheduler: tick finished"
                    ),
                    Err(e) => error!(
                        job = job.name(),
                        error = %e,
                        "JobScheduler: tick failed"
                    ),
                }
            }
        });

        *slot = Some(handle);
    }

    /// Stop the scheduler, abandoning any in-flight tick
    pub async fn stop(&self) {
        let mut handle = self.handle.write().await;
        if let Some(h) = handle.take() {
            h.abort();
            info!(job = self.job.name(), "JobScheduler: stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        let handle = self.handle.read().await;
        handle.is_some()
    }
}
