use crate::{Bar, MarketError, PriceQuote, Timeframe};
use async_trait::async_trait;

/// Trait for upstream bar/quote providers.
///
/// Implementations must return bars with monotonically non-decreasing
/// timestamps. Transient failures surface as `RateLimited` or
/// `DataSourceUnavailable`; callers retry on the next tick.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, MarketError>;

    async fn get_current_price(&self, symbol: &str) -> Result<PriceQuote, MarketError>;
}
