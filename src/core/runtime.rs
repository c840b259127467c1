//! Component wiring shared by the binaries

use crate::config::Config;
use crate::core::scheduler::{JobScheduler, ScheduledJob};
use crate::db::{MemoryDatabase, PostgresDatabase, Storage};
use crate::jobs::{AlertJob, ForecastReconcileJob, JobContext, RetentionJob};
use crate::metrics::Metrics;
use crate::services::coinmarketcap::CoinMarketCapClient;
use crate::services::forecast::{ForecastProvider, LlmForecastClient};
use crate::services::market_data::PriceProvider;
use crate::services::monitor::MonitorService;
use crate::services::notifier::Notifier;
use std::sync::Arc;
use tracing::{info, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Long-lived handles built once from `Config`
pub struct AppServices {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub prices: Arc<dyn PriceProvider>,
    pub forecaster: Option<Arc<dyn ForecastProvider>>,
    pub metrics: Arc<Metrics>,
    pub monitor: Arc<MonitorService>,
}

impl AppServices {
    pub async fn from_config(config: Config) -> Result<Self, BoxError> {
        let metrics = Arc::new(Metrics::new()?);

        let storage: Arc<dyn Storage> = match config.database_url.as_deref() {
            Some(url) => {
                info!("Connecting to Postgres...");
                let db = PostgresDatabase::connect(url).await?;
                metrics.database_connected.set(1.0);
                info!("Postgres connected");
                Arc::new(db)
            }
            None => {
                warn!("DATABASE_URL not set - using in-memory storage, data is lost on restart and not shared with other processes");
                Arc::new(MemoryDatabase::new())
            }
        };

        let prices: Arc<dyn PriceProvider> =
            Arc::new(CoinMarketCapClient::new(&config.market_data)?);

        let forecaster: Option<Arc<dyn ForecastProvider>> = match &config.forecast {
            Some(forecast) => Some(Arc::new(LlmForecastClient::new(
                forecast,
                config.jobs.forecast_horizon_hours,
            )?)),
            None => {
                warn!("LLM_API_KEY not set - forecasts are disabled");
                None
            }
        };

        Ok(Self::with_components(
            config,
            storage,
            prices,
            forecaster,
            metrics,
        ))
    }

    /// Assemble services around already-built components
    pub fn with_components(
        config: Config,
        storage: Arc<dyn Storage>,
        prices: Arc<dyn PriceProvider>,
        forecaster: Option<Arc<dyn ForecastProvider>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let monitor = Arc::new(MonitorService::new(
            storage.clone(),
            prices.clone(),
            forecaster.clone(),
            Some(metrics.clone()),
        ));

        Self {
            config,
            storage,
            prices,
            forecaster,
            metrics,
            monitor,
        }
    }

    pub fn job_context(&self, notifier: Arc<dyn Notifier>) -> Arc<JobContext> {
        Arc::new(JobContext::new(
            self.storage.clone(),
            self.prices.clone(),
            notifier,
            Some(self.metrics.clone()),
        ))
    }
}

/// The worker's schedulers: alerts, forecast reconciliation and retention
pub struct WorkerRuntime {
    schedulers: Vec<JobScheduler>,
}

impl WorkerRuntime {
    pub fn new(services: &AppServices, notifier: Arc<dyn Notifier>) -> Result<Self, BoxError> {
        let ctx = services.job_context(notifier);
        let jobs = &services.config.jobs;

        let alerts: Arc<dyn ScheduledJob> =
            Arc::new(AlertJob::new(ctx.clone(), jobs.alert_concurrency));
        let reconcile: Arc<dyn ScheduledJob> = Arc::new(ForecastReconcileJob::new(
            ctx.clone(),
            jobs.forecast_horizon_hours,
        ));
        let retention: Arc<dyn ScheduledJob> = Arc::new(RetentionJob::new(ctx, jobs));

        let schedulers = vec![
            JobScheduler::new(alerts, jobs.alert_interval_seconds)?,
            JobScheduler::new(reconcile, jobs.reconcile_interval_seconds)?,
            JobScheduler::new(retention, jobs.reconcile_interval_seconds)?,
        ];

        Ok(Self { schedulers })
    }

    pub async fn start(&self) {
        for scheduler in &self.schedulers {
            scheduler.start().await;
        }
        info!(jobs = self.schedulers.len(), "WorkerRuntime: schedulers started");
    }

    pub async fn stop(&self) {
        for scheduler in &self.schedulers {
            scheduler.stop().await;
        }
        info!("WorkerRuntime: schedulers stopped");
    }
}
