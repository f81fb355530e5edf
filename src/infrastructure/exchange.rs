//! Exchange gateway: the candle surface the core consumes.
//!
//! Wraps a registered raw [`CandleSource`] with bounded retries, anomaly
//! guards, VWAP computation, and the backtest no-look-ahead filter.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::errors::ExchangeError;
use crate::domain::ports::CandleSource;
use crate::domain::types::{Candle, CandleInterval, ExecutionContext, OrderBook};

pub struct ExchangeGateway {
    source: Arc<dyn CandleSource>,
    config: Arc<Config>,
}

impl ExchangeGateway {
    pub fn new(source: Arc<dyn CandleSource>, config: Arc<Config>) -> Self {
        Self { source, config }
    }

    /// Most recent candles at or before `ctx.now`, oldest first.
    ///
    /// In backtest mode any candle dated after `now` is dropped before the
    /// caller can observe it.
    pub async fn get_candles(
        &self,
        ctx: &ExecutionContext,
        interval: CandleInterval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit = limit.min(self.config.max_candles_per_request);
        let mut candles = self
            .fetch_with_retry(&ctx.symbol, interval, ctx.now, limit, false)
            .await?;

        if ctx.backtest {
            candles.retain(|c| c.timestamp <= ctx.now);
        }
        self.guard(&ctx.symbol, &candles)?;
        Ok(candles)
    }

    /// Candles from `ctx.now` forward. Backtest-only.
    pub async fn get_next_candles(
        &self,
        ctx: &ExecutionContext,
        interval: CandleInterval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        if !ctx.backtest {
            return Err(ExchangeError::ForwardFetchInLive {
                symbol: ctx.symbol.clone(),
            });
        }

        let limit = limit.min(self.config.max_candles_per_request);
        let candles = self
            .fetch_with_retry(&ctx.symbol, interval, ctx.now, limit, true)
            .await?;
        self.guard(&ctx.symbol, &candles)?;
        Ok(candles)
    }

    /// VWAP over the configured window of 1-minute candles. Typical price
    /// is (high + low + close) / 3; with zero traded volume the VWAP falls
    /// back to the arithmetic mean of closes.
    pub async fn get_average_price(&self, ctx: &ExecutionContext) -> Result<f64, ExchangeError> {
        let candles = self
            .get_candles(
                ctx,
                CandleInterval::OneMinute,
                self.config.avg_price_candles_count,
            )
            .await?;

        let total_volume: f64 = candles.iter().map(|c| c.volume).sum();
        let vwap = if total_volume > 0.0 {
            let weighted: f64 = candles.iter().map(|c| c.typical_price() * c.volume).sum();
            weighted / total_volume
        } else {
            debug!(
                "ExchangeGateway [{}]: zero volume in VWAP window, falling back to close average",
                ctx.symbol
            );
            candles.iter().map(|c| c.close).sum::<f64>() / candles.len() as f64
        };
        Ok(vwap)
    }

    /// Depth snapshot from the adapter, sanity-checked for finite levels.
    pub async fn get_order_book(
        &self,
        ctx: &ExecutionContext,
        depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        let book = self.source.order_book(&ctx.symbol, depth).await?;
        let malformed = book
            .bids
            .iter()
            .chain(book.asks.iter())
            .any(|l| !l.price.is_finite() || l.price <= 0.0 || !l.quantity.is_finite());
        if malformed {
            return Err(ExchangeError::InvalidData {
                symbol: ctx.symbol.clone(),
                reason: "malformed order book level".to_string(),
            });
        }
        Ok(book)
    }

    pub fn format_price(&self, symbol: &str, value: f64) -> String {
        self.source.format_price(symbol, value)
    }

    pub fn format_quantity(&self, symbol: &str, value: f64) -> String {
        self.source.format_quantity(symbol, value)
    }

    async fn fetch_with_retry(
        &self,
        symbol: &str,
        interval: CandleInterval,
        pivot: i64,
        limit: usize,
        forward: bool,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let max_attempts = self.config.get_candles_retry_count.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = if forward {
                self.source.candles_from(symbol, interval, pivot, limit).await
            } else {
                self.source.candles_before(symbol, interval, pivot, limit).await
            };

            match result {
                Ok(candles) => return Ok(candles),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "ExchangeGateway [{}]: transient candle fetch failure (attempt {}/{}): {}",
                        symbol, attempt, max_attempts, e
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.get_candles_retry_delay_ms,
                    ))
                    .await;
                }
                Err(e) if e.is_transient() => {
                    return Err(ExchangeError::FetchFailed {
                        symbol: symbol.to_string(),
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reject empty batches, malformed candles, and closes that stray from
    /// the window median beyond the configured factor.
    fn guard(&self, symbol: &str, candles: &[Candle]) -> Result<(), ExchangeError> {
        if candles.is_empty() {
            return Err(ExchangeError::NoData {
                symbol: symbol.to_string(),
            });
        }

        if let Some(bad) = candles.iter().find(|c| c.is_anomalous()) {
            return Err(ExchangeError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("malformed candle at {}", bad.timestamp),
            });
        }

        if candles.len() >= self.config.min_candles_for_median {
            let mut closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            closes.sort_by(|a, b| a.total_cmp(b));
            let median = closes[closes.len() / 2];
            let factor = self.config.price_anomaly_threshold_factor;
            if median > 0.0 {
                for candle in candles {
                    if candle.close > median * factor || candle.close < median / factor {
                        return Err(ExchangeError::PriceAnomaly {
                            symbol: symbol.to_string(),
                            close: candle.close,
                            median,
                            factor,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
