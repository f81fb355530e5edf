use serde::Serialize;

use crate::domain::pnl::SignalPnl;
use crate::domain::types::{CancelReason, CloseReason, Signal};

/// Lifecycle and operational events broadcast on the bus. Per signal id,
/// lifecycle events arrive in order: scheduled? -> opened -> partial/breakeven*
/// -> closed | cancelled; none of them fires twice except `Active` and the
/// per-level milestone events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SignalEvent {
    Scheduled {
        signal: Signal,
    },
    Opened {
        signal: Signal,
    },
    Active {
        signal_id: String,
        symbol: String,
        current_price: f64,
        revenue_percent: f64,
    },
    Closed {
        signal: Signal,
        reason: CloseReason,
        price_close: f64,
        pnl: SignalPnl,
    },
    Cancelled {
        signal: Signal,
        reason: CancelReason,
    },
    /// Proposal discarded by the signal validator.
    SignalRejected {
        symbol: String,
        strategy_name: String,
        reason: String,
    },
    RiskApproved {
        symbol: String,
        strategy_name: String,
    },
    RiskRejected {
        symbol: String,
        strategy_name: String,
        note: String,
    },
    PartialProfit {
        signal_id: String,
        symbol: String,
        level: u8,
        revenue_percent: f64,
    },
    PartialLoss {
        signal_id: String,
        symbol: String,
        level: u8,
        revenue_percent: f64,
    },
    Breakeven {
        signal_id: String,
        symbol: String,
        price_stop_loss: f64,
    },
    Performance {
        metric_type: String,
        started_at: i64,
        finished_at: i64,
    },
    Progress {
        symbol: String,
        strategy_name: String,
        processed: usize,
        total: usize,
    },
    Error {
        scope: String,
        message: String,
    },
    DoneBacktest {
        symbol: String,
        strategy_name: String,
        frame_name: String,
    },
    DoneLive {
        symbol: String,
        strategy_name: String,
    },
}

impl SignalEvent {
    /// Channel tag, stable across payload changes. Used by subscribers to
    /// filter and by tests to assert emission counts.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalEvent::Scheduled { .. } => "scheduled",
            SignalEvent::Opened { .. } => "opened",
            SignalEvent::Active { .. } => "active",
            SignalEvent::Closed { .. } => "closed",
            SignalEvent::Cancelled { .. } => "cancelled",
            SignalEvent::SignalRejected { .. } => "signal_rejected",
            SignalEvent::RiskApproved { .. } => "risk_allowed",
            SignalEvent::RiskRejected { .. } => "risk_rejected",
            SignalEvent::PartialProfit { .. } => "partial_profit",
            SignalEvent::PartialLoss { .. } => "partial_loss",
            SignalEvent::Breakeven { .. } => "breakeven",
            SignalEvent::Performance { .. } => "performance",
            SignalEvent::Progress { .. } => "walker_progress",
            SignalEvent::Error { .. } => "error",
            SignalEvent::DoneBacktest { .. } => "done_backtest",
            SignalEvent::DoneLive { .. } => "done_live",
        }
    }

    /// Signal id carried by the event, when it concerns a single signal.
    pub fn signal_id(&self) -> Option<&str> {
        match self {
            SignalEvent::Scheduled { signal }
            | SignalEvent::Opened { signal }
            | SignalEvent::Closed { signal, .. }
            | SignalEvent::Cancelled { signal, .. } => Some(&signal.id),
            SignalEvent::Active { signal_id, .. }
            | SignalEvent::PartialProfit { signal_id, .. }
            | SignalEvent::PartialLoss { signal_id, .. }
            | SignalEvent::Breakeven { signal_id, .. } => Some(signal_id),
            _ => None,
        }
    }
}
