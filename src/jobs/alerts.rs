//! Subscription alert job: one polling cycle over all active subscriptions

use crate::core::scheduler::ScheduledJob;
use crate::db::retry_write;
use crate::error::{ProviderError, Result};
use crate::jobs::context::JobContext;
use crate::models::{
    DeliveryStatus, NewNotificationLog, Notification, PricePoint, PriceQuote, Subscription,
};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of a single tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub subscriptions: usize,
    pub symbols: usize,
    /// Symbols whose price could not be fetched; their subscriptions were skipped.
    pub failed_symbols: Vec<String>,
    /// Subscriptions changed by their user while the tick ran; left untouched.
    pub superseded: usize,
    pub fired: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

pub struct AlertJob {
    ctx: Arc<JobContext>,
    concurrency: usize,
}

impl AlertJob {
    pub fn new(ctx: Arc<JobContext>, concurrency: usize) -> Self {
        Self {
            ctx,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one polling cycle.
    ///
    /// Only a failure to load subscriptions aborts the tick. Price and delivery
    /// failures are logged per symbol or per user and the tick carries on.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let started = Instant::now();
        let subscriptions = self.ctx.storage.active_subscriptions().await?;

        let mut by_symbol: BTreeMap<String, Vec<Subscription>> = BTreeMap::new();
        for subscription in subscriptions.iter() {
            by_symbol
                .entry(subscription.symbol.clone())
                .or_default()
                .push(subscription.clone());
        }

        let mut report = TickReport {
            subscriptions: subscriptions.len(),
            symbols: by_symbol.len(),
            ..TickReport::default()
        };

        let quotes: Vec<(String, std::result::Result<PriceQuote, ProviderError>)> =
            stream::iter(by_symbol.keys().cloned())
                .map(|symbol| {
                    let prices = self.ctx.prices.clone();
                    async move {
                        let result = prices.quote(&symbol).await;
                        (symbol, result)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (symbol, result) in quotes {
            let quote = match result {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        error = %e,
                        kind = %e.kind,
                        "Price fetch failed, skipping symbol for this tick"
                    );
                    if let Some(metrics) = &self.ctx.metrics {
                        metrics.price_fetch_failures_total.inc();
                    }
                    report.failed_symbols.push(symbol);
                    continue;
                }
            };

            let point = PricePoint::from_quote(&quote, self.ctx.prices.name());
            if let Err(e) = retry_write("store_price", || self.ctx.storage.store_price(&point)).await
            {
                warn!(symbol = %symbol, error = %e, "Failed to store price point");
            }

            let Some(group) = by_symbol.get(&symbol) else {
                continue;
            };
            for subscription in group {
                self.evaluate(subscription, &quote, &mut report).await;
            }
        }

        report.failed_symbols.sort();

        if let Some(metrics) = &self.ctx.metrics {
            metrics.alert_ticks_total.inc();
            metrics
                .alert_tick_duration_seconds
                .observe(started.elapsed().as_secs_f64());
        }

        info!(
            subscriptions = report.subscriptions,
            symbols = report.symbols,
            failed_symbols = report.failed_symbols.len(),
            superseded = report.superseded,
            fired = report.fired,
            sent = report.notifications_sent,
            failed = report.notifications_failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Alert tick complete"
        );
        Ok(report)
    }

    async fn evaluate(&self, subscription: &Subscription, quote: &PriceQuote, report: &mut TickReport) {
        let evaluation = subscription.evaluate(quote.price, Utc::now());

        // A subscription whose new state was not saved stays armed and fires next tick.
        let recorded = retry_write("record_evaluation", || {
            self.ctx.storage.record_evaluation(
                subscription.id,
                subscription.updated_at,
                &evaluation.update,
            )
        })
        .await;
        match recorded {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    subscription_id = subscription.id,
                    symbol = %subscription.symbol,
                    "Subscription changed during tick, skipping"
                );
                report.superseded += 1;
                return;
            }
            Err(e) => {
                error!(
                    subscription_id = subscription.id,
                    symbol = %subscription.symbol,
                    error = %e,
                    "Failed to record evaluation"
                );
                return;
            }
        }

        if !evaluation.fired {
            debug!(
                subscription_id = subscription.id,
                symbol = %subscription.symbol,
                price = quote.price,
                "Condition not triggered"
            );
            return;
        }

        report.fired += 1;
        let notification = Notification {
            subscription_id: subscription.id,
            user_id: subscription.user_id,
            symbol: subscription.symbol.clone(),
            price: quote.price,
            condition: subscription.condition,
            text: subscription.alert_message(quote.price),
        };

        if self.deliver(&notification).await {
            report.notifications_sent += 1;
        } else {
            report.notifications_failed += 1;
        }
    }

    /// Send one notification and log the attempt; returns whether it was delivered.
    async fn deliver(&self, notification: &Notification) -> bool {
        let outcome = self
            .ctx
            .notifier
            .send(notification.user_id, &notification.text)
            .await;

        let (status, error_text) = match &outcome {
            Ok(()) => {
                info!(
                    user_id = notification.user_id,
                    symbol = %notification.symbol,
                    price = notification.price,
                    "Alert delivered"
                );
                if let Some(metrics) = &self.ctx.metrics {
                    metrics.notifications_sent_total.inc();
                }
                (DeliveryStatus::Sent, None)
            }
            Err(e) => {
                warn!(
                    user_id = notification.user_id,
                    symbol = %notification.symbol,
                    error = %e,
                    "Alert delivery failed"
                );
                if let Some(metrics) = &self.ctx.metrics {
                    metrics.notifications_failed_total.inc();
                }
                (DeliveryStatus::Failed, Some(e.to_string()))
            }
        };

        let log = NewNotificationLog {
            user_id: notification.user_id,
            symbol: notification.symbol.clone(),
            kind: notification.condition.kind.as_str().to_string(),
            message: notification.text.clone(),
            status,
            error: error_text,
            sent_at: Utc::now(),
        };
        if let Err(e) = retry_write("store_notification", || self.ctx.storage.store_notification(&log)).await
        {
            warn!(user_id = notification.user_id, error = %e, "Failed to store notification log");
        }

        outcome.is_ok()
    }
}

#[async_trait]
impl ScheduledJob for AlertJob {
    fn name(&self) -> &'static str {
        "alerts"
    }

    async fn run(&self) -> Result<()> {
        self.run_tick().await.map(|_| ())
    }
}
