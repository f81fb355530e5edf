//! Scripted candle source for tests and deterministic scenario runs.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::ExchangeError;
use crate::domain::ports::CandleSource;
use crate::domain::types::{Candle, CandleInterval, MS_PER_MINUTE, OrderBook};

/// A candle tape indexed by open time. Both fetch directions slice the
/// same tape, which makes backtest and live paths observable with one
/// scripted market.
#[derive(Clone)]
pub struct MockCandleSource {
    tape: Arc<RwLock<Vec<Candle>>>,
    book: Arc<RwLock<Option<OrderBook>>>,
}

impl MockCandleSource {
    pub fn new(mut tape: Vec<Candle>) -> Self {
        tape.sort_by_key(|c| c.timestamp);
        Self {
            tape: Arc::new(RwLock::new(tape)),
            book: Arc::new(RwLock::new(None)),
        }
    }

    /// Script a depth snapshot; without one the source reports depth as
    /// unsupported, like a bare candle feed.
    pub async fn set_order_book(&self, book: OrderBook) {
        *self.book.write().await = Some(book);
    }

    /// Append candles mid-run (live tests extend the market as time moves).
    pub async fn extend(&self, candles: impl IntoIterator<Item = Candle>) {
        let mut tape = self.tape.write().await;
        tape.extend(candles);
        tape.sort_by_key(|c| c.timestamp);
    }

    /// Flat candle helper: open = high = low = close.
    pub fn flat(ts: i64, price: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }
    }

    /// A run of flat one-minute candles starting at `start`.
    pub fn flat_run(start: i64, price: f64, count: usize) -> Vec<Candle> {
        (0..count as i64)
            .map(|i| Self::flat(start + i * MS_PER_MINUTE, price))
            .collect()
    }
}

#[async_trait]
impl CandleSource for MockCandleSource {
    async fn candles_before(
        &self,
        _symbol: &str,
        _interval: CandleInterval,
        end: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let tape = self.tape.read().await;
        let mut out: Vec<Candle> = tape.iter().filter(|c| c.timestamp <= end).copied().collect();
        let skip = out.len().saturating_sub(limit);
        out.drain(..skip);
        Ok(out)
    }

    async fn candles_from(
        &self,
        _symbol: &str,
        _interval: CandleInterval,
        start: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let tape = self.tape.read().await;
        Ok(tape
            .iter()
            .filter(|c| c.timestamp >= start)
            .take(limit)
            .copied()
            .collect())
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ExchangeError> {
        match self.book.read().await.clone() {
            Some(mut book) => {
                book.bids.truncate(depth);
                book.asks.truncate(depth);
                Ok(book)
            }
            None => Err(ExchangeError::OrderBookUnsupported {
                symbol: symbol.to_string(),
            }),
        }
    }

    fn format_price(&self, _symbol: &str, value: f64) -> String {
        format!("{:.2}", value)
    }

    fn format_quantity(&self, _symbol: &str, value: f64) -> String {
        format!("{:.6}", value)
    }
}
