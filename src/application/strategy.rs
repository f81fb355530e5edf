//! Single-signal-per-symbol strategy state machine.
//!
//! One `ClientStrategy` owns the lifecycle for its `(strategy, symbol)`
//! lane: at most one pending and at most one scheduled signal at any
//! moment. Drivers fix an execution timestamp and call [`ClientStrategy::tick`];
//! the backtest driver additionally replays open positions through
//! [`ClientStrategy::backtest_fastforward`].
//!
//! Ordering contract: every state transition is persisted before its
//! lifecycle event is published and before the outcome is returned. Risk
//! `add_signal` runs before the `opened` event; `remove_signal` runs after
//! the close is persisted. A persistence write failure aborts the tick and
//! leaves the in-memory state untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::milestones::MilestoneTracker;
use crate::application::risk::{RiskManager, ValidationResult};
use crate::config::Config;
use crate::domain::errors::TickError;
use crate::domain::events::SignalEvent;
use crate::domain::pnl::{gross_revenue_percent, net_pnl};
use crate::domain::repositories::SignalStore;
use crate::domain::schema::StrategySchema;
use crate::domain::types::{
    Candle, CandleInterval, CancelReason, CloseReason, ExecutionContext, MS_PER_MINUTE, Position,
    Signal, SignalProposal, TickOutcome,
};
use crate::domain::validation::validate_proposal;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::ExchangeGateway;

pub struct ClientStrategy {
    symbol: String,
    exchange_name: String,
    frame_name: Option<String>,
    schema: StrategySchema,
    interval_ms: i64,
    config: Arc<Config>,
    exchange: Arc<ExchangeGateway>,
    store: Arc<dyn SignalStore>,
    risk: Arc<RiskManager>,
    bus: EventBus,

    pending: Option<Signal>,
    scheduled: Option<Signal>,
    milestones: MilestoneTracker,
    last_signal_ts: Option<i64>,
    stopped: Arc<AtomicBool>,
    initialized: bool,
}

impl ClientStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        exchange_name: impl Into<String>,
        schema: StrategySchema,
        exchange: Arc<ExchangeGateway>,
        store: Arc<dyn SignalStore>,
        risk: Arc<RiskManager>,
        bus: EventBus,
        config: Arc<Config>,
    ) -> Self {
        let interval_ms = schema.interval_minutes as i64 * MS_PER_MINUTE;
        Self {
            symbol: symbol.into(),
            exchange_name: exchange_name.into(),
            frame_name: None,
            schema,
            interval_ms,
            config,
            exchange,
            store,
            risk,
            bus,
            pending: None,
            scheduled: None,
            milestones: MilestoneTracker::default(),
            last_signal_ts: None,
            stopped: Arc::new(AtomicBool::new(false)),
            initialized: false,
        }
    }

    pub fn with_frame(mut self, frame_name: impl Into<String>) -> Self {
        self.frame_name = Some(frame_name.into());
        self
    }

    /// Shared stop flag; setting it makes the strategy refuse new signals
    /// so the live driver can wind down at the next safe state.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation: no new signals after this call.
    pub fn dispose(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn context(&self, now: i64, backtest: bool) -> ExecutionContext {
        ExecutionContext {
            symbol: self.symbol.clone(),
            strategy_name: self.schema.strategy_name.clone(),
            exchange_name: self.exchange_name.clone(),
            frame_name: self.frame_name.clone(),
            now,
            backtest,
        }
    }

    /// Hydrate the lane from persistence. Idempotent; runs once per
    /// instance, before the first mutation.
    pub async fn wait_for_init(&mut self) -> Result<(), TickError> {
        if self.initialized {
            return Ok(());
        }

        let strategy = self.schema.strategy_name.clone();
        let mut pending = self.store.read_pending(&strategy, &self.symbol).await?;
        let mut scheduled = self.store.read_scheduled(&strategy, &self.symbol).await?;
        let fired = self.store.read_fired(&strategy, &self.symbol).await?;

        // A crash between limit promotion writes can leave both slots
        // set. The pending signal is the live position; the scheduled
        // slot is stale and gets repaired here.
        if pending.is_some() && scheduled.is_some() {
            warn!(
                "ClientStrategy [{}]: both pending and scheduled slots set after restart, repairing",
                self.symbol
            );
            self.store
                .write_scheduled(&strategy, &self.symbol, None)
                .await?;
            scheduled = None;
        }

        if let Some(sig) = &pending {
            debug!(
                "ClientStrategy [{}]: recovered pending signal {}",
                self.symbol, sig.id
            );
        }

        self.risk.wait_for_init().await?;
        self.pending = pending;
        self.scheduled = scheduled;
        self.milestones = MilestoneTracker::hydrate(fired);
        self.initialized = true;
        Ok(())
    }

    /// One logical advancement of the lane at `now`.
    pub async fn tick(&mut self, now: i64, backtest: bool) -> Result<TickOutcome, TickError> {
        self.wait_for_init().await?;
        let ctx = self.context(now, backtest);

        if self.scheduled.is_some() {
            return self.check_scheduled(&ctx).await;
        }
        if self.pending.is_some() {
            return self.monitor_pending(&ctx).await;
        }
        self.try_generate(&ctx).await
    }

    // --- Scheduled activation -------------------------------------------

    async fn check_scheduled(&mut self, ctx: &ExecutionContext) -> Result<TickOutcome, TickError> {
        let Some(sched) = self.scheduled.clone() else {
            return Ok(TickOutcome::Idle);
        };
        let scheduled_at = sched.scheduled_at.unwrap_or(sched.timestamp);

        let elapsed_ms = (ctx.now - scheduled_at).max(0);
        let window = (elapsed_ms / MS_PER_MINUTE + 1) as usize;
        let candles = self
            .exchange
            .get_candles(ctx, CandleInterval::OneMinute, window)
            .await?;

        for candle in candles.iter().filter(|c| c.timestamp >= scheduled_at) {
            match sched.position {
                Position::Long => {
                    // Stop loss dominates activation: a candle that
                    // touches both rejects the entry.
                    if candle.low <= sched.price_stop_loss {
                        return self.cancel_scheduled(ctx, CancelReason::PriceReject).await;
                    }
                    if candle.low <= sched.price_open {
                        return self.activate_scheduled(ctx, candle.timestamp).await;
                    }
                }
                Position::Short => {
                    if candle.high >= sched.price_stop_loss {
                        return self.cancel_scheduled(ctx, CancelReason::PriceReject).await;
                    }
                    if candle.high >= sched.price_open {
                        return self.activate_scheduled(ctx, candle.timestamp).await;
                    }
                }
            }
        }

        if elapsed_ms > self.config.schedule_await_minutes as i64 * MS_PER_MINUTE {
            return self.cancel_scheduled(ctx, CancelReason::Timeout).await;
        }

        Ok(TickOutcome::Waiting)
    }

    async fn cancel_scheduled(
        &mut self,
        ctx: &ExecutionContext,
        reason: CancelReason,
    ) -> Result<TickOutcome, TickError> {
        let Some(sig) = self.scheduled.clone() else {
            return Ok(TickOutcome::Idle);
        };

        self.store
            .write_scheduled(&ctx.strategy_name, &ctx.symbol, None)
            .await?;
        self.scheduled = None;

        info!(
            "ClientStrategy [{}]: scheduled signal {} cancelled ({})",
            ctx.symbol, sig.id, reason
        );
        self.bus
            .publish(SignalEvent::Cancelled {
                signal: sig.clone(),
                reason,
            })
            .await;
        Ok(TickOutcome::Cancelled {
            signal: sig,
            reason,
        })
    }

    async fn activate_scheduled(
        &mut self,
        ctx: &ExecutionContext,
        activated_at: i64,
    ) -> Result<TickOutcome, TickError> {
        let Some(mut sig) = self.scheduled.clone() else {
            return Ok(TickOutcome::Idle);
        };
        sig.pending_at = Some(activated_at);

        self.store
            .write_pending(&ctx.strategy_name, &ctx.symbol, Some(&sig))
            .await?;
        self.store
            .write_scheduled(&ctx.strategy_name, &ctx.symbol, None)
            .await?;
        self.risk
            .add_signal(&ctx.strategy_name, &ctx.symbol, activated_at)
            .await?;

        self.pending = Some(sig.clone());
        self.scheduled = None;

        info!(
            "ClientStrategy [{}]: scheduled signal {} activated at {}",
            ctx.symbol, sig.id, sig.price_open
        );
        self.bus
            .publish(SignalEvent::Opened {
                signal: sig.clone(),
            })
            .await;
        if let Some(on_opened) = &self.schema.callbacks.on_opened {
            on_opened(&sig);
        }
        Ok(TickOutcome::Opened(sig))
    }

    // --- Pending monitoring ---------------------------------------------

    async fn monitor_pending(&mut self, ctx: &ExecutionContext) -> Result<TickOutcome, TickError> {
        let Some(sig) = self.pending.clone() else {
            return Ok(TickOutcome::Idle);
        };

        let price = self.exchange.get_average_price(ctx).await?;

        if let Some(expires_at) = sig.expires_at()
            && ctx.now >= expires_at
        {
            return self.close_pending(ctx, CloseReason::TimeExpired, price).await;
        }

        let tp_hit = match sig.position {
            Position::Long => price >= sig.price_take_profit,
            Position::Short => price <= sig.price_take_profit,
        };
        if tp_hit {
            return self
                .close_pending(ctx, CloseReason::TakeProfit, sig.price_take_profit)
                .await;
        }

        let sl_hit = match sig.position {
            Position::Long => price <= sig.price_stop_loss,
            Position::Short => price >= sig.price_stop_loss,
        };
        if sl_hit {
            return self
                .close_pending(ctx, CloseReason::StopLoss, sig.price_stop_loss)
                .await;
        }

        let revenue = gross_revenue_percent(sig.position, sig.price_open, price);
        self.apply_breakeven(ctx, revenue).await?;
        self.fire_milestones(ctx, &sig.id, revenue).await?;

        self.bus
            .publish(SignalEvent::Active {
                signal_id: sig.id.clone(),
                symbol: ctx.symbol.clone(),
                current_price: price,
                revenue_percent: revenue,
            })
            .await;

        let signal = self.pending.clone().unwrap_or(sig);
        Ok(TickOutcome::Active {
            signal,
            current_price: price,
        })
    }

    /// Move the stop loss to the entry price once gross revenue clears the
    /// configured threshold. Fires at most once per signal: after the move
    /// the stop equals the open.
    async fn apply_breakeven(
        &mut self,
        ctx: &ExecutionContext,
        revenue_percent: f64,
    ) -> Result<(), TickError> {
        let Some(sig) = &self.pending else {
            return Ok(());
        };
        if revenue_percent < self.config.breakeven_threshold
            || sig.price_stop_loss == sig.price_open
        {
            return Ok(());
        }

        let mut updated = sig.clone();
        updated.price_stop_loss = updated.price_open;
        self.store
            .write_pending(&ctx.strategy_name, &ctx.symbol, Some(&updated))
            .await?;

        info!(
            "ClientStrategy [{}]: signal {} stop moved to breakeven at {}",
            ctx.symbol, updated.id, updated.price_stop_loss
        );
        let event = SignalEvent::Breakeven {
            signal_id: updated.id.clone(),
            symbol: ctx.symbol.clone(),
            price_stop_loss: updated.price_stop_loss,
        };
        self.pending = Some(updated);
        self.bus.publish(event).await;
        Ok(())
    }

    async fn fire_milestones(
        &mut self,
        ctx: &ExecutionContext,
        signal_id: &str,
        revenue_percent: f64,
    ) -> Result<(), TickError> {
        let hits = self.milestones.peek(signal_id, revenue_percent);
        if hits.is_empty() {
            return Ok(());
        }

        let projected = self.milestones.projected(signal_id, &hits);
        self.store
            .write_fired(&ctx.strategy_name, &ctx.symbol, &projected)
            .await?;
        self.milestones.commit(signal_id, &hits);

        for hit in hits {
            let event = if hit.profit {
                SignalEvent::PartialProfit {
                    signal_id: signal_id.to_string(),
                    symbol: ctx.symbol.clone(),
                    level: hit.level,
                    revenue_percent,
                }
            } else {
                SignalEvent::PartialLoss {
                    signal_id: signal_id.to_string(),
                    symbol: ctx.symbol.clone(),
                    level: hit.level,
                    revenue_percent,
                }
            };
            self.bus.publish(event).await;
        }
        Ok(())
    }

    async fn close_pending(
        &mut self,
        ctx: &ExecutionContext,
        reason: CloseReason,
        price_close: f64,
    ) -> Result<TickOutcome, TickError> {
        let Some(sig) = self.pending.clone() else {
            return Ok(TickOutcome::Idle);
        };

        let pnl = net_pnl(sig.position, sig.price_open, price_close, &self.config);

        self.store
            .write_pending(&ctx.strategy_name, &ctx.symbol, None)
            .await?;
        let fired = self.milestones.projected_without(&sig.id);
        self.store
            .write_fired(&ctx.strategy_name, &ctx.symbol, &fired)
            .await?;

        self.pending = None;
        self.milestones.clear(&sig.id);

        self.risk
            .remove_signal(&ctx.strategy_name, &ctx.symbol)
            .await?;

        if reason == CloseReason::TimeExpired && pnl.pnl_percent < 0.0 {
            warn!(
                "ClientStrategy [{}]: signal {} expired at a loss ({:.2}%)",
                ctx.symbol, sig.id, pnl.pnl_percent
            );
        } else {
            info!(
                "ClientStrategy [{}]: signal {} closed ({}) at {} for {:.2}%",
                ctx.symbol, sig.id, reason, price_close, pnl.pnl_percent
            );
        }

        self.bus
            .publish(SignalEvent::Closed {
                signal: sig.clone(),
                reason,
                price_close,
                pnl,
            })
            .await;
        if let Some(on_closed) = &self.schema.callbacks.on_closed {
            on_closed(&sig, &pnl);
        }

        Ok(TickOutcome::Closed {
            signal: sig,
            reason,
            price_close,
            pnl,
        })
    }

    // --- Signal generation ----------------------------------------------

    async fn try_generate(&mut self, ctx: &ExecutionContext) -> Result<TickOutcome, TickError> {
        if self.is_stopped() {
            return Ok(TickOutcome::Idle);
        }
        if let Some(last) = self.last_signal_ts
            && ctx.now - last < self.interval_ms
        {
            return Ok(TickOutcome::Idle);
        }

        let generation = (self.schema.get_signal)(self.symbol.clone(), ctx.now);
        let timeout = Duration::from_secs(self.config.max_signal_generation_seconds);
        let proposal = match tokio::time::timeout(timeout, generation).await {
            Err(_) => {
                error!(
                    "ClientStrategy [{}]: signal generation timed out after {}s",
                    ctx.symbol, self.config.max_signal_generation_seconds
                );
                self.bus
                    .publish(SignalEvent::Error {
                        scope: format!("get_signal:{}", ctx.strategy_name),
                        message: format!(
                            "signal generation timed out after {}s",
                            self.config.max_signal_generation_seconds
                        ),
                    })
                    .await;
                return Ok(TickOutcome::Idle);
            }
            Ok(Err(e)) => {
                error!(
                    "ClientStrategy [{}]: signal generation failed: {}",
                    ctx.symbol, e
                );
                self.bus
                    .publish(SignalEvent::Error {
                        scope: format!("get_signal:{}", ctx.strategy_name),
                        message: e.to_string(),
                    })
                    .await;
                return Ok(TickOutcome::Idle);
            }
            Ok(Ok(None)) => {
                self.last_signal_ts = Some(ctx.now);
                return Ok(TickOutcome::Idle);
            }
            Ok(Ok(Some(proposal))) => {
                self.last_signal_ts = Some(ctx.now);
                proposal
            }
        };

        let vwap = self.exchange.get_average_price(ctx).await?;

        if let Err(reason) = validate_proposal(&proposal, vwap, &self.config) {
            debug!(
                "ClientStrategy [{}]: proposal rejected: {}",
                ctx.symbol, reason
            );
            self.bus
                .publish(SignalEvent::SignalRejected {
                    symbol: ctx.symbol.clone(),
                    strategy_name: ctx.strategy_name.clone(),
                    reason: reason.to_string(),
                })
                .await;
            return Ok(TickOutcome::Idle);
        }

        match self.risk.check_signal(&proposal, ctx, vwap).await {
            ValidationResult::Reject(_) => return Ok(TickOutcome::Idle),
            ValidationResult::Approve => {}
        }

        self.promote(ctx, proposal, vwap).await
    }

    async fn promote(
        &mut self,
        ctx: &ExecutionContext,
        proposal: SignalProposal,
        vwap: f64,
    ) -> Result<TickOutcome, TickError> {
        let gap_percent = (proposal.price_open - vwap).abs() / vwap * 100.0;
        let immediate = gap_percent <= self.config.schedule_price_epsilon_percent;

        let mut sig = Signal {
            id: Uuid::new_v4().to_string(),
            position: proposal.position,
            symbol: ctx.symbol.clone(),
            strategy_name: ctx.strategy_name.clone(),
            exchange_name: ctx.exchange_name.clone(),
            price_open: proposal.price_open,
            price_take_profit: proposal.price_take_profit,
            price_stop_loss: proposal.price_stop_loss,
            original_price_take_profit: proposal.price_take_profit,
            original_price_stop_loss: proposal.price_stop_loss,
            minute_estimated_time: proposal.minute_estimated_time,
            timestamp: ctx.now,
            scheduled_at: None,
            pending_at: None,
            total_executed: 0.0,
            note: proposal.note,
        };

        if immediate {
            sig.pending_at = Some(ctx.now);
            self.store
                .write_pending(&ctx.strategy_name, &ctx.symbol, Some(&sig))
                .await?;
            self.risk
                .add_signal(&ctx.strategy_name, &ctx.symbol, ctx.now)
                .await?;
            self.pending = Some(sig.clone());

            info!(
                "ClientStrategy [{}]: {} signal {} opened at {}",
                ctx.symbol, sig.position, sig.id, sig.price_open
            );
            self.bus
                .publish(SignalEvent::Opened {
                    signal: sig.clone(),
                })
                .await;
            if let Some(on_opened) = &self.schema.callbacks.on_opened {
                on_opened(&sig);
            }
            Ok(TickOutcome::Opened(sig))
        } else {
            sig.scheduled_at = Some(ctx.now);
            self.store
                .write_scheduled(&ctx.strategy_name, &ctx.symbol, Some(&sig))
                .await?;
            self.scheduled = Some(sig.clone());

            info!(
                "ClientStrategy [{}]: {} signal {} scheduled at {} (market {})",
                ctx.symbol, sig.position, sig.id, sig.price_open, vwap
            );
            self.bus
                .publish(SignalEvent::Scheduled {
                    signal: sig.clone(),
                })
                .await;
            Ok(TickOutcome::Scheduled(sig))
        }
    }

    // --- Backtest fast-forward ------------------------------------------

    /// Replay monitoring over a forward candle range and return the close
    /// together with its timestamp so the driver can skip consumed
    /// timeline entries.
    ///
    /// Priority inside one candle matches tick mode: time expiry, then
    /// take profit against the candle high/low, then stop loss. A window
    /// that ends without a trigger closes synthetically as time-expired.
    pub async fn backtest_fastforward(
        &mut self,
        now: i64,
        candles: &[Candle],
    ) -> Result<(TickOutcome, i64), TickError> {
        self.wait_for_init().await?;
        let Some(open_sig) = self.pending.clone() else {
            return Ok((TickOutcome::Idle, now));
        };
        let pending_at = open_sig.pending_at.unwrap_or(open_sig.timestamp);
        let expires_at = pending_at + open_sig.lifetime_ms();

        let mut last_seen: Option<Candle> = None;
        for candle in candles.iter().filter(|c| c.timestamp >= pending_at) {
            let ctx = self.context(candle.timestamp, true);
            // The stop may trail to breakeven mid-replay.
            let Some(sig) = self.pending.clone() else {
                break;
            };

            if candle.timestamp >= expires_at {
                let price = candle.typical_price();
                let outcome = self
                    .close_pending(&ctx, CloseReason::TimeExpired, price)
                    .await?;
                return Ok((outcome, candle.timestamp));
            }

            let tp_hit = match sig.position {
                Position::Long => candle.high >= sig.price_take_profit,
                Position::Short => candle.low <= sig.price_take_profit,
            };
            if tp_hit {
                let outcome = self
                    .close_pending(&ctx, CloseReason::TakeProfit, sig.price_take_profit)
                    .await?;
                return Ok((outcome, candle.timestamp));
            }

            let sl_hit = match sig.position {
                Position::Long => candle.low <= sig.price_stop_loss,
                Position::Short => candle.high >= sig.price_stop_loss,
            };
            if sl_hit {
                let outcome = self
                    .close_pending(&ctx, CloseReason::StopLoss, sig.price_stop_loss)
                    .await?;
                return Ok((outcome, candle.timestamp));
            }

            let typical = candle.typical_price();
            let revenue = gross_revenue_percent(sig.position, sig.price_open, typical);
            self.apply_breakeven(&ctx, revenue).await?;
            self.fire_milestones(&ctx, &sig.id, revenue).await?;
            self.bus
                .publish(SignalEvent::Active {
                    signal_id: sig.id.clone(),
                    symbol: ctx.symbol.clone(),
                    current_price: typical,
                    revenue_percent: revenue,
                })
                .await;
            last_seen = Some(*candle);
        }

        // No trigger inside the window: synthetic time-expired close at
        // the expiry minute.
        let price = last_seen
            .map(|c| c.typical_price())
            .unwrap_or(open_sig.price_open);
        let closed_at = last_seen
            .map(|c| c.timestamp.max(expires_at))
            .unwrap_or(expires_at);
        let ctx = self.context(closed_at, true);
        let outcome = self
            .close_pending(&ctx, CloseReason::TimeExpired, price)
            .await?;
        Ok((outcome, closed_at))
    }
}
