//! Market data provider interface

use crate::error::ProviderError;
use crate::models::PriceQuote;
use async_trait::async_trait;

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Provider name recorded as the `source` of stored price points
    fn name(&self) -> &'static str;

    /// Latest price for an upper-case ticker such as `BTC`
    async fn quote(&self, symbol: &str) -> Result<PriceQuote, ProviderError>;
}
