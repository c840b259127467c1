//! Prometheus metrics for the HTTP backend and background jobs

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounter,
    pub http_request_duration_seconds: Histogram,
    pub http_requests_in_flight: IntGauge,
    pub alert_ticks_total: IntCounter,
    pub alert_tick_duration_seconds: Histogram,
    pub price_fetch_failures_total: IntCounter,
    pub notifications_sent_total: IntCounter,
    pub notifications_failed_total: IntCounter,
    pub forecasts_generated_total: IntCounter,
    pub database_connected: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total =
            IntCounter::with_opts(Opts::new("http_requests_total", "Total HTTP requests"))?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        ))?;
        let http_requests_in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "HTTP requests currently being served",
        ))?;
        let alert_ticks_total =
            IntCounter::with_opts(Opts::new("alert_ticks_total", "Completed alert job ticks"))?;
        let alert_tick_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "alert_tick_duration_seconds",
            "Alert job tick duration in seconds",
        ))?;
        let price_fetch_failures_total = IntCounter::with_opts(Opts::new(
            "price_fetch_failures_total",
            "Price fetches that failed during alert ticks",
        ))?;
        let notifications_sent_total = IntCounter::with_opts(Opts::new(
            "notifications_sent_total",
            "Alert notifications delivered",
        ))?;
        let notifications_failed_total = IntCounter::with_opts(Opts::new(
            "notifications_failed_total",
            "Alert notifications the chat platform rejected",
        ))?;
        let forecasts_generated_total = IntCounter::with_opts(Opts::new(
            "forecasts_generated_total",
            "Forecasts stored in forecast history",
        ))?;
        let database_connected = Gauge::with_opts(Opts::new(
            "database_connected",
            "1 when the relational store is connected",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(alert_ticks_total.clone()))?;
        registry.register(Box::new(alert_tick_duration_seconds.clone()))?;
        registry.register(Box::new(price_fetch_failures_total.clone()))?;
        registry.register(Box::new(notifications_sent_total.clone()))?;
        registry.register(Box::new(notifications_failed_total.clone()))?;
        registry.register(Box::new(forecasts_generated_total.clone()))?;
        registry.register(Box::new(database_connected.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            alert_ticks_total,
            alert_tick_duration_seconds,
            price_fetch_failures_total,
            notifications_sent_total,
            notifications_failed_total,
            forecasts_generated_total,
            database_connected,
        })
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
