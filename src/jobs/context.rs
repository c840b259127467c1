//! Job context for dependency injection

use crate::db::Storage;
use crate::metrics::Metrics;
use crate::services::market_data::PriceProvider;
use crate::services::notifier::Notifier;
use std::sync::Arc;

/// Shared handles every background job reads from.
///
/// Jobs hold no state of their own between ticks; everything that must
/// survive a tick lives in storage.
pub struct JobContext {
    pub storage: Arc<dyn Storage>,
    pub prices: Arc<dyn PriceProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Option<Arc<Metrics>>,
}

impl JobContext {
    pub fn new(
        storage: Arc<dyn Storage>,
        prices: Arc<dyn PriceProvider>,
        notifier: Arc<dyn Notifier>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            storage,
            prices,
            notifier,
            metrics,
        }
    }
}
