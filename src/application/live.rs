//! Live driver.
//!
//! An infinite poll loop at a fixed cadence. Each iteration fixes `now`
//! from the wall clock, ticks the state machine, publishes a performance
//! sample, and yields only transition outcomes (`Opened`, `Closed`,
//! `Cancelled`) to the consumer. Errors are absorbed: the loop reports
//! them and keeps polling. Shutdown is cooperative through the strategy's
//! stop flag and takes effect at the next safe state.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver};
use tracing::{error, info};

use crate::application::strategy::ClientStrategy;
use crate::domain::events::SignalEvent;
use crate::domain::types::TickOutcome;
use crate::infrastructure::event_bus::EventBus;

/// One minute plus a millisecond of margin, so consecutive ticks land on
/// fresh candles.
pub const TICK_TTL_MS: u64 = 60_001;

const OUTCOME_QUEUE_DEPTH: usize = 64;

pub type NowFn = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct LiveDriver {
    strategy: ClientStrategy,
    bus: EventBus,
    tick_ttl: Duration,
    now_fn: NowFn,
}

impl LiveDriver {
    pub fn new(strategy: ClientStrategy, bus: EventBus) -> Self {
        Self {
            strategy,
            bus,
            tick_ttl: Duration::from_millis(TICK_TTL_MS),
            now_fn: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Test hook: replace the wall clock and the tick cadence.
    pub fn with_clock(mut self, now_fn: NowFn, tick_ttl: Duration) -> Self {
        self.now_fn = now_fn;
        self.tick_ttl = tick_ttl;
        self
    }

    /// Poll until stopped, yielding transition outcomes.
    pub fn run(mut self) -> Receiver<TickOutcome> {
        let (tx, rx) = mpsc::channel(OUTCOME_QUEUE_DEPTH);

        tokio::spawn(async move {
            let ctx_base = self.strategy.context(0, false);
            info!(
                "LiveDriver [{}]: polling every {}ms",
                ctx_base.symbol,
                self.tick_ttl.as_millis()
            );

            loop {
                let tick_start = (self.now_fn)();
                let result = self.strategy.tick(tick_start, false).await;
                let tick_end = (self.now_fn)();

                self.bus
                    .publish(SignalEvent::Performance {
                        metric_type: "live_tick".to_string(),
                        started_at: tick_start,
                        finished_at: tick_end,
                    })
                    .await;

                match result {
                    Err(e) => {
                        error!("LiveDriver [{}]: tick failed: {}", ctx_base.symbol, e);
                        self.bus
                            .publish(SignalEvent::Error {
                                scope: "live_tick".to_string(),
                                message: e.to_string(),
                            })
                            .await;
                    }
                    Ok(outcome) if outcome.is_transition() => {
                        let closed = matches!(outcome, TickOutcome::Closed { .. });
                        if tx.send(outcome).await.is_err() {
                            break;
                        }
                        if closed && self.strategy.is_stopped() {
                            break;
                        }
                    }
                    Ok(outcome) => {
                        // Idle / Waiting / Scheduled / Active are kept off
                        // the consumer stream; a stopped idle lane is the
                        // safe exit point.
                        if self.strategy.is_stopped() && matches!(outcome, TickOutcome::Idle) {
                            break;
                        }
                    }
                }

                tokio::time::sleep(self.tick_ttl).await;
            }

            self.bus
                .publish(SignalEvent::DoneLive {
                    symbol: ctx_base.symbol.clone(),
                    strategy_name: ctx_base.strategy_name.clone(),
                })
                .await;
            info!("LiveDriver [{}]: stopped", ctx_base.symbol);
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk::RiskManager;
    use crate::config::Config;
    use crate::domain::schema::{StrategyCallbacks, StrategySchema};
    use crate::domain::types::{MS_PER_MINUTE, Position, SignalProposal};
    use crate::infrastructure::exchange::ExchangeGateway;
    use crate::infrastructure::mock::MockCandleSource;
    use crate::infrastructure::persistence::MemoryStore;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    /// Exchange failures never kill the loop; the stop flag winds it
    /// down at the next idle tick.
    #[tokio::test]
    async fn errors_are_absorbed_and_stop_is_cooperative() {
        let config = Arc::new(Config::default());
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let mut events = bus.subscribe().await;

        // Empty tape: every VWAP fetch fails while a proposal is offered.
        let gateway = Arc::new(ExchangeGateway::new(
            Arc::new(MockCandleSource::new(vec![])),
            Arc::clone(&config),
        ));
        let risk = Arc::new(RiskManager::disabled(store.clone(), bus.clone()));
        let strategy = ClientStrategy::new(
            "BTCUSDT",
            "mock",
            StrategySchema {
                strategy_name: "momentum".to_string(),
                interval_minutes: 1,
                get_signal: Arc::new(|_symbol, _now| {
                    Box::pin(async {
                        Ok(Some(SignalProposal {
                            position: Position::Long,
                            price_open: 100.0,
                            price_take_profit: 103.0,
                            price_stop_loss: 98.0,
                            minute_estimated_time: 30,
                            note: None,
                        }))
                    })
                }),
                risk_name: None,
                callbacks: StrategyCallbacks::default(),
            },
            gateway,
            store,
            risk,
            bus.clone(),
            config,
        );
        let stop = strategy.stop_flag();

        // Advance a minute per loop; request the stop after three ticks.
        let clock = Arc::new(AtomicI64::new(1_709_251_200_000));
        let calls = Arc::new(AtomicUsize::new(0));
        let now_fn: NowFn = {
            let clock = Arc::clone(&clock);
            let calls = Arc::clone(&calls);
            let stop = Arc::clone(&stop);
            Arc::new(move || {
                if calls.fetch_add(1, Ordering::SeqCst) >= 6 {
                    stop.store(true, Ordering::SeqCst);
                }
                clock.fetch_add(MS_PER_MINUTE / 2, Ordering::SeqCst)
            })
        };

        let mut rx = LiveDriver::new(strategy, bus)
            .with_clock(now_fn, Duration::from_millis(1))
            .run();

        // No transition ever happens; the channel just closes once the
        // stopped lane reaches an idle tick.
        assert!(rx.recv().await.is_none());

        let mut errors = 0;
        let mut done = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SignalEvent::Error { .. } => errors += 1,
                SignalEvent::DoneLive { .. } => done = true,
                _ => {}
            }
        }
        assert!(errors >= 1);
        assert!(done);
    }
}
