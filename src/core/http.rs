//! HTTP endpoint server using Axum

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use crate::db::retry_write;
use crate::error::{Error, PersistenceError, ProviderErrorKind};
use crate::metrics::Metrics;
use crate::models::{Condition, RequestLog};
use crate::services::monitor::{MonitorService, HISTORY_WINDOW_HOURS, RECENT_LIMIT};

pub const SERVICE_NAME: &str = "crypto-monitor";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request bodies above this size are refused instead of buffered.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<RwLock<HealthStatus>>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
    pub monitor: Arc<MonitorService>,
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(monitor: Arc<MonitorService>, metrics: Arc<Metrics>, api_key: Option<String>) -> Self {
        Self {
            health: Arc::new(RwLock::new(HealthStatus::default())),
            metrics,
            start_time: Arc::new(Instant::now()),
            monitor,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub status: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Error::Provider(e) => match e.kind {
                ProviderErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                ProviderErrorKind::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
                ProviderErrorKind::Network | ProviderErrorKind::InvalidResponse => {
                    (StatusCode::BAD_GATEWAY, "provider")
                }
            },
            Error::Persistence(PersistenceError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            Error::Persistence(PersistenceError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "persistence")
            }
            Error::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence"),
            Error::NotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_configured"),
            Error::Delivery(_) => (StatusCode::BAD_GATEWAY, "delivery"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        (status, Json(json!({ "error": kind, "detail": self.to_string() }))).into_response()
    }
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let health = state.health.read().await;
    let uptime_seconds = state.start_time.elapsed().as_secs();
    Ok(Json(json!({
        "status": health.status,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "service": SERVICE_NAME
    })))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();
    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();
    state.metrics.http_requests_in_flight.dec();

    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

/// Rejects `/api` calls without the configured `X-API-Key`
async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Rejected request with missing or invalid API key");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized", "detail": "Invalid API key" })),
        )
            .into_response()
    }
}

fn body_text(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Records every request as a `request_logs` row and tags the response with its id
async fn request_log_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let timestamp = Utc::now();
    let method = request.method().to_string();
    let url = request.uri().to_string();
    let query_params = request.uri().query().map(str::to_string);
    let client_host = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let (parts, body) = request.into_parts();
    let (request_body, response) = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => {
            let text = body_text(&bytes);
            let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
            (text, response)
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to buffer request body");
            let response = (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": "validation", "detail": "Request body too large" })),
            )
                .into_response();
            (None, response)
        }
    };

    let (mut parts, body) = response.into_parts();
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to buffer response body");
            Default::default()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, value);
    }

    let log = RequestLog {
        request_id,
        timestamp,
        method,
        url,
        client_host,
        query_params,
        request_body,
        response_body: if is_json { body_text(&bytes) } else { None },
        status_code: i32::from(parts.status.as_u16()),
        processing_time: started.elapsed().as_secs_f64(),
    };
    let storage = state.monitor.storage();
    if let Err(e) = retry_write("store_request_log", || storage.store_request_log(&log)).await {
        warn!(request_id = %log.request_id, error = %e, "Failed to store request log");
    }

    Response::from_parts(parts, Body::from(bytes))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ForecastsQuery {
    symbol: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct NotificationsQuery {
    user_id: i64,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UnsubscribeQuery {
    user_id: i64,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    user_id: i64,
    symbol: String,
    condition: Condition,
}

/// Latest price with 24h trend
async fn get_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, Error> {
    let report = state.monitor.rate(&symbol).await?;
    Ok(Json(json!({
        "symbol": report.quote.symbol,
        "price": report.quote.price,
        "percent_change_24h": report.quote.percent_change_24h,
        "trend": report.trend,
        "message": report.summary(),
    })))
}

async fn get_price_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Value>, Error> {
    let hours = params.hours.unwrap_or(HISTORY_WINDOW_HOURS);
    let history = state.monitor.price_history(&symbol, hours).await?;
    Ok(Json(json!({
        "symbol": symbol.to_uppercase(),
        "hours": hours,
        "history": history,
    })))
}

async fn get_forecast(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, Error> {
    let record = state.monitor.forecast(&symbol).await?;
    Ok(Json(json!(record)))
}

async fn list_forecasts(
    State(state): State<AppState>,
    Query(params): Query<ForecastsQuery>,
) -> Result<Json<Value>, Error> {
    let forecasts = state
        .monitor
        .recent_forecasts(params.symbol.as_deref(), params.limit.unwrap_or(RECENT_LIMIT))
        .await?;
    Ok(Json(json!(forecasts)))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Value>, Error> {
    let subscriptions = state.monitor.subscriptions(params.user_id).await?;
    Ok(Json(json!(subscriptions)))
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<Value>), Error> {
    let (subscription, quote) = state
        .monitor
        .subscribe(request.user_id, &request.symbol, request.condition)
        .await?;

    let message = format!(
        "Subscribed to {} {} (current: ${:.2})",
        subscription.symbol, subscription.condition, quote.price
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "subscription": subscription, "message": message })),
    ))
}

async fn delete_subscription(
    State(state): State<AppState>,
    Query(params): Query<UnsubscribeQuery>,
) -> Result<Json<Value>, Error> {
    let removed = state
        .monitor
        .unsubscribe(params.user_id, &params.symbol)
        .await?;
    if !removed {
        return Err(PersistenceError::NotFound {
            entity: "subscription",
            id: format!("{}/{}", params.user_id, params.symbol.to_uppercase()),
        }
        .into());
    }

    Ok(Json(json!({
        "message": format!("Subscription for {} removed", params.symbol.to_uppercase())
    })))
}

async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationsQuery>,
) -> Result<Json<Value>, Error> {
    let notifications = state
        .monitor
        .notifications(params.user_id, params.limit.unwrap_or(RECENT_LIMIT))
        .await?;
    Ok(Json(json!(notifications)))
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/price/{symbol}", get(get_price))
        .route("/api/price/history/{symbol}", get(get_price_history))
        .route("/api/forecast/{symbol}", get(get_forecast))
        .route("/api/forecasts", get(list_forecasts))
        .route(
            "/api/subscriptions",
            get(list_subscriptions)
                .post(create_subscription)
                .delete(delete_subscription),
        )
        .route("/api/notifications", get(list_notifications))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    request_log_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve the router until `shutdown` resolves
pub async fn start_server<F>(
    state: AppState,
    bind_address: &str,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    info!(address = %bind_address, "HTTP server listening on {}", bind_address);
    info!("Metrics endpoint available at http://{}/metrics", bind_address);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
