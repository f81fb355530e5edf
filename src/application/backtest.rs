//! Backtest driver.
//!
//! Walks a frame's precomputed timeline, ticking the state machine at
//! each timestamp. Once a position opens it switches to fast-forward:
//! one forward candle fetch replays the whole monitoring window, and the
//! timeline index skips past the close. Consumers receive only `Closed`
//! outcomes; every other outcome still publishes its events on the bus.

use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver};
use tracing::{error, info};

use crate::application::frame;
use crate::application::strategy::ClientStrategy;
use crate::domain::events::SignalEvent;
use crate::domain::schema::FrameSchema;
use crate::domain::types::{CandleInterval, TickOutcome};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::ExchangeGateway;

/// Consumer queue depth; the driver naturally throttles on a slow reader.
const OUTCOME_QUEUE_DEPTH: usize = 64;

pub struct BacktestDriver {
    strategy: ClientStrategy,
    frame: FrameSchema,
    exchange: Arc<ExchangeGateway>,
    bus: EventBus,
}

impl BacktestDriver {
    pub fn new(
        strategy: ClientStrategy,
        frame: FrameSchema,
        exchange: Arc<ExchangeGateway>,
        bus: EventBus,
    ) -> Self {
        Self {
            strategy,
            frame,
            exchange,
            bus,
        }
    }

    /// Run to frame exhaustion on a background task, yielding closed
    /// signals in order.
    pub fn run(mut self) -> Receiver<TickOutcome> {
        let (tx, rx) = mpsc::channel(OUTCOME_QUEUE_DEPTH);

        tokio::spawn(async move {
            let timeline = frame::timeline(&self.frame);
            let total = timeline.len();
            let ctx_base = self.strategy.context(0, true);
            info!(
                "BacktestDriver [{}]: walking {} timestamps of frame {}",
                ctx_base.symbol, total, self.frame.frame_name
            );

            let mut i = 0;
            while i < total {
                let now = timeline[i];
                self.bus
                    .publish(SignalEvent::Progress {
                        symbol: ctx_base.symbol.clone(),
                        strategy_name: ctx_base.strategy_name.clone(),
                        processed: i,
                        total,
                    })
                    .await;

                match self.strategy.tick(now, true).await {
                    Ok(TickOutcome::Opened(sig)) => {
                        // Fast-forward the whole monitoring window in one
                        // candle fetch instead of minute ticks.
                        let pending_at = sig.pending_at.unwrap_or(now);
                        let limit = sig.minute_estimated_time as usize + 1;
                        let ctx = self.strategy.context(pending_at, true);

                        let replay = match self
                            .exchange
                            .get_next_candles(&ctx, CandleInterval::OneMinute, limit)
                            .await
                        {
                            Ok(candles) => {
                                self.strategy.backtest_fastforward(pending_at, &candles).await
                            }
                            Err(e) => Err(e.into()),
                        };

                        match replay {
                            Ok((outcome @ TickOutcome::Closed { .. }, closed_at)) => {
                                while i < total && timeline[i] <= closed_at {
                                    i += 1;
                                }
                                if tx.send(outcome).await.is_err() {
                                    return;
                                }
                                continue;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(
                                    "BacktestDriver [{}]: fast-forward failed: {}",
                                    ctx_base.symbol, e
                                );
                                self.bus
                                    .publish(SignalEvent::Error {
                                        scope: "backtest_fastforward".to_string(),
                                        message: e.to_string(),
                                    })
                                    .await;
                            }
                        }
                    }
                    Ok(outcome @ TickOutcome::Closed { .. }) => {
                        if tx.send(outcome).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Per-tick failures are recorded and the walk
                        // continues at the next timestamp.
                        error!(
                            "BacktestDriver [{}]: tick at {} failed: {}",
                            ctx_base.symbol, now, e
                        );
                        self.bus
                            .publish(SignalEvent::Error {
                                scope: "backtest_tick".to_string(),
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
                i += 1;
            }

            self.bus
                .publish(SignalEvent::DoneBacktest {
                    symbol: ctx_base.symbol.clone(),
                    strategy_name: ctx_base.strategy_name.clone(),
                    frame_name: self.frame.frame_name.clone(),
                })
                .await;
            info!(
                "BacktestDriver [{}]: frame {} exhausted",
                ctx_base.symbol, self.frame.frame_name
            );
        });

        rx
    }
}
