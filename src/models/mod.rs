//! Shared data models spanning the service layers.

pub mod forecast;
pub mod notification;
pub mod price;
pub mod request_log;
pub mod subscription;

pub use forecast::{accuracy_score, Forecast, ForecastRecord, NewForecastRecord};
pub use notification::{DeliveryStatus, NewNotificationLog, Notification, NotificationLog};
pub use price::{PricePoint, PriceQuote, Trend};
pub use request_log::RequestLog;
pub use subscription::{
    normalize_symbol, Condition, ConditionKind, Evaluation, NewSubscription, Subscription,
    SubscriptionUpdate,
};
