//! Audit rows for inbound HTTP API calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub client_host: Option<String>,
    pub query_params: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub status_code: i32,
    /// Seconds spent serving the request.
    pub processing_time: f64,
}
