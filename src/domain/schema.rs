//! Registration schemas: the user-facing contracts handed to the engine.
//! A risk validation is always a `{ validate, note? }` record; bare
//! functions are wrapped at construction.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::domain::pnl::SignalPnl;
use crate::domain::ports::CandleSource;
use crate::domain::types::{ActivePosition, Signal, SignalProposal};

pub type SignalFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<Option<SignalProposal>>> + Send>>;

/// User signal generator: `(symbol, now_ms) -> Option<SignalProposal>`.
/// Treated as a black box; the state machine bounds it with a timeout.
pub type SignalCallback = Arc<dyn Fn(String, i64) -> SignalFuture + Send + Sync>;

/// Exchange registration: a named raw candle adapter.
#[derive(Clone)]
pub struct ExchangeSchema {
    pub exchange_name: String,
    pub source: Arc<dyn CandleSource>,
}

/// Optional lifecycle hooks invoked after the matching event is published.
#[derive(Clone, Default)]
pub struct StrategyCallbacks {
    pub on_opened: Option<Arc<dyn Fn(&Signal) + Send + Sync>>,
    pub on_closed: Option<Arc<dyn Fn(&Signal, &SignalPnl) + Send + Sync>>,
}

#[derive(Clone)]
pub struct StrategySchema {
    pub strategy_name: String,
    /// Minimum minutes between two signal-generation attempts.
    pub interval_minutes: u64,
    pub get_signal: SignalCallback,
    /// Risk group name; `None` opts out of portfolio gating.
    pub risk_name: Option<String>,
    pub callbacks: StrategyCallbacks,
}

/// Backtest frame: a named `[start, end)` window walked at a fixed step.
#[derive(Debug, Clone)]
pub struct FrameSchema {
    pub frame_name: String,
    pub interval_minutes: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Everything a user risk validation may inspect.
pub struct RiskCheck<'a> {
    pub proposal: &'a SignalProposal,
    pub symbol: &'a str,
    pub strategy_name: &'a str,
    pub exchange_name: &'a str,
    pub current_price: f64,
    pub timestamp: i64,
    pub active_positions: &'a HashMap<String, ActivePosition>,
}

impl RiskCheck<'_> {
    pub fn active_position_count(&self) -> usize {
        self.active_positions.len()
    }
}

/// A validation rejects by returning `Err`; the error message (or the
/// record's `note`) becomes the rejection reason.
pub type RiskCheckFn = Arc<dyn Fn(&RiskCheck<'_>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct RiskValidation {
    pub note: Option<String>,
    pub validate: RiskCheckFn,
}

impl RiskValidation {
    /// Wrap a bare function without a note.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&RiskCheck<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            note: None,
            validate: Arc::new(f),
        }
    }

    pub fn with_note<F>(note: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RiskCheck<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            note: Some(note.into()),
            validate: Arc::new(f),
        }
    }
}

#[derive(Clone, Default)]
pub struct RiskSchema {
    pub risk_name: String,
    /// Run in declaration order; the first rejection wins.
    pub validations: Vec<RiskValidation>,
}
