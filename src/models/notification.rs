//! Alert notifications and their delivery log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::subscription::Condition;

/// Payload emitted when a subscription fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subscription_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub price: f64,
    pub condition: Condition,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "sent" {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotificationLog {
    pub user_id: i64,
    pub symbol: String,
    pub kind: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// A row of `notification_logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub kind: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}
