//! Profit-and-loss arithmetic.
//!
//! Slippage is applied per side against the trade (a long buys higher and
//! sells lower than quoted), then the round-trip fee is subtracted from the
//! raw percentage.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::domain::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalPnl {
    /// Net result in percent after slippage and the round-trip fee.
    pub pnl_percent: f64,
    pub price_open: f64,
    pub price_close: f64,
}

/// Net PnL for a closed signal per the execution-cost model.
pub fn net_pnl(position: Position, price_open: f64, price_close: f64, config: &Config) -> SignalPnl {
    let s = config.percent_slippage / 100.0;

    let raw_percent = match position {
        Position::Long => {
            let open_eff = price_open * (1.0 + s);
            let close_eff = price_close * (1.0 - s);
            (close_eff - open_eff) / open_eff * 100.0
        }
        Position::Short => {
            let open_eff = price_open * (1.0 - s);
            let close_eff = price_close * (1.0 + s);
            (open_eff - close_eff) / open_eff * 100.0
        }
    };

    SignalPnl {
        pnl_percent: raw_percent - 2.0 * config.percent_fee,
        price_open,
        price_close,
    }
}

/// Signed revenue percent at `current_price` before slippage and fees.
/// Drives partial milestones and the breakeven stop move.
pub fn gross_revenue_percent(position: Position, price_open: f64, current_price: f64) -> f64 {
    match position {
        Position::Long => (current_price - price_open) / price_open * 100.0,
        Position::Short => (price_open - current_price) / price_open * 100.0,
    }
}
