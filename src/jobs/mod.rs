//! Background jobs driven by the scheduler

pub mod alerts;
pub mod context;
pub mod reconcile;

pub use alerts::{AlertJob, TickReport};
pub use context::JobContext;
pub use reconcile::{ForecastReconcileJob, ReconcileReport, RetentionJob};
