//! Market data fetcher port trait.

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::ohlcv::OhlcvFrame;
use std::fmt;

/// Identity of one cached OHLCV series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketKey {
    pub exchange: String,
    pub market: String,
    pub interval_secs: i64,
    pub price_type: Option<String>,
}

impl MarketKey {
    pub fn new(exchange: &str, market: &str, interval_secs: i64) -> Self {
        MarketKey {
            exchange: exchange.to_string(),
            market: market.to_string(),
            interval_secs,
            price_type: None,
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ohlcv,exchange={},market={},interval={},price_type={}",
            self.exchange,
            self.market,
            self.interval_secs,
            self.price_type.as_deref().unwrap_or("none")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub key: MarketKey,
    pub start_time: Option<Timestamp>,
}

/// A provider of OHLCV bars (exchange API, warehouse table, files).
///
/// When `previous` is given the implementation should extend it with newer
/// bars instead of refetching the full history.
pub trait MarketDataPort: Send + Sync {
    fn fetch_ohlcv(
        &self,
        request: &FetchRequest,
        previous: Option<&OhlcvFrame>,
    ) -> Result<OhlcvFrame, AnalyzerError>;
}
