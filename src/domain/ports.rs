use crate::domain::errors::ExchangeError;
use crate::domain::types::{Candle, CandleInterval, OrderBook};
use async_trait::async_trait;

/// Raw candle adapter contract. Implementations are registered per
/// exchange name and wrapped by the exchange gateway, which layers retry,
/// anomaly guarding, VWAP, and backtest no-look-ahead on top.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Up to `limit` most recent candles whose open time is at or before
    /// `end`, oldest first.
    async fn candles_before(
        &self,
        symbol: &str,
        interval: CandleInterval,
        end: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Up to `limit` candles whose open time is at or after `start`,
    /// oldest first. Only meaningful for historical data sets; the
    /// gateway rejects forward fetches outside of backtest mode.
    async fn candles_from(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Depth snapshot, best levels first. Adapters without depth data
    /// keep the default.
    async fn order_book(&self, symbol: &str, _depth: usize) -> Result<OrderBook, ExchangeError> {
        Err(ExchangeError::OrderBookUnsupported {
            symbol: symbol.to_string(),
        })
    }

    /// Render a price with the venue's tick-size precision.
    fn format_price(&self, symbol: &str, value: f64) -> String;

    /// Render a quantity with the venue's lot-size precision.
    fn format_quantity(&self, symbol: &str, value: f64) -> String;
}
