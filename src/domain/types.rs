use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::pnl::SignalPnl;

pub const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Long,
    Short,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Long => write!(f, "LONG"),
            Position::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time, ms since epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Typical price: (high + low + close) / 3, the per-candle term of the
    /// VWAP numerator.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// True when any field is non-finite, negative, or the OHLC ordering
    /// `low <= open,close <= high` is broken.
    pub fn is_anomalous(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return true;
        }
        self.low > self.open
            || self.low > self.close
            || self.high < self.open
            || self.high < self.close
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
}

impl CandleInterval {
    pub fn minutes(&self) -> i64 {
        match self {
            CandleInterval::OneMinute => 1,
            CandleInterval::FiveMinutes => 5,
            CandleInterval::FifteenMinutes => 15,
            CandleInterval::OneHour => 60,
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.minutes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Depth snapshot from an exchange adapter, best levels first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

/// Candidate signal returned by the user strategy callback. Validated and
/// either discarded (with a reason emitted) or promoted to a [`Signal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalProposal {
    pub position: Position,
    /// Activation price. May equal current VWAP for an immediate open or
    /// differ for a scheduled limit entry.
    pub price_open: f64,
    pub price_take_profit: f64,
    pub price_stop_loss: f64,
    /// Lifetime budget in minutes once the position is open.
    pub minute_estimated_time: u64,
    pub note: Option<String>,
}

/// A promoted signal. Immutable after creation except for the trailing
/// TP/SL fields and `total_executed`; the `original_*` snapshots are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub position: Position,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub price_open: f64,
    pub price_take_profit: f64,
    pub price_stop_loss: f64,
    pub original_price_take_profit: f64,
    pub original_price_stop_loss: f64,
    pub minute_estimated_time: u64,
    /// Creation time, ms since epoch.
    pub timestamp: i64,
    /// Set when the signal was queued as a scheduled limit entry.
    pub scheduled_at: Option<i64>,
    /// Set when the position opened (immediately or at promotion).
    pub pending_at: Option<i64>,
    /// Cumulative percentage [0, 100] removed via partial exits.
    pub total_executed: f64,
    pub note: Option<String>,
}

impl Signal {
    pub fn lifetime_ms(&self) -> i64 {
        self.minute_estimated_time as i64 * MS_PER_MINUTE
    }

    /// Expiry timestamp of the open position, if one exists.
    pub fn expires_at(&self) -> Option<i64> {
        self.pending_at.map(|t| t + self.lifetime_ms())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeExpired,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TimeExpired => write!(f, "time_expired"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The stop loss was reached before the limit entry could activate.
    PriceReject,
    /// The scheduled signal waited longer than the configured budget.
    Timeout,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::PriceReject => write!(f, "price_reject"),
            CancelReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Tagged result of one state-machine tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Nothing happened: no signal generated or the proposal was rejected.
    Idle,
    /// A new scheduled limit entry was queued this tick.
    Scheduled(Signal),
    /// A scheduled signal exists and is still awaiting activation.
    Waiting,
    /// A position opened this tick (immediate open or limit promotion).
    Opened(Signal),
    /// The open position survived monitoring this tick.
    Active { signal: Signal, current_price: f64 },
    Closed {
        signal: Signal,
        reason: CloseReason,
        price_close: f64,
        pnl: SignalPnl,
    },
    Cancelled { signal: Signal, reason: CancelReason },
}

impl TickOutcome {
    /// True for the outcomes the live driver yields to its consumer.
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            TickOutcome::Opened(_) | TickOutcome::Closed { .. } | TickOutcome::Cancelled { .. }
        )
    }
}

/// Entry in the risk group's active-positions map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePosition {
    pub opened_at: i64,
}

/// Ambient per-tick context, passed explicitly through every core API.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: Option<String>,
    /// Execution timestamp fixed by the driver, ms since epoch.
    pub now: i64,
    pub backtest: bool,
}
