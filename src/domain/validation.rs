//! Pure proposal validation. No side effects; the caller emits the
//! rejection reason on the event channel.

use thiserror::Error;

use crate::config::Config;
use crate::domain::types::{Position, SignalProposal};

/// Distinct rejection reasons for a [`SignalProposal`]. The `Display`
/// strings are the typed reasons surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("Price {field} must be a finite positive number")]
    NonFinitePrice { field: &'static str },

    #[error("Long prices must satisfy stop_loss < open < take_profit")]
    LongPriceOrder,

    #[error("Short prices must satisfy take_profit < open < stop_loss")]
    ShortPriceOrder,

    #[error("Take profit distance {distance_percent:.4}% is below the {min_percent}% minimum")]
    TakeProfitTooClose {
        distance_percent: f64,
        min_percent: f64,
    },

    #[error("Take profit distance {distance_percent:.4}% exceeds the {max_percent}% maximum")]
    TakeProfitTooFar {
        distance_percent: f64,
        max_percent: f64,
    },

    #[error("Stop loss distance {distance_percent:.4}% is below the {min_percent}% minimum")]
    StopLossTooClose {
        distance_percent: f64,
        min_percent: f64,
    },

    #[error("Stop loss distance {distance_percent:.4}% exceeds the {max_percent}% maximum")]
    StopLossTooFar {
        distance_percent: f64,
        max_percent: f64,
    },

    #[error("Estimated lifetime {minutes} is outside [1, {max_minutes}] minutes")]
    LifetimeOutOfRange { minutes: u64, max_minutes: u64 },

    #[error("Scheduled entry gap points the wrong way: {position} at open {price_open} vs market {vwap}")]
    ScheduleGapDirection {
        position: Position,
        price_open: f64,
        vwap: f64,
    },
}

/// Validate a proposal against the current VWAP and the configured bands.
pub fn validate_proposal(
    proposal: &SignalProposal,
    vwap: f64,
    config: &Config,
) -> Result<(), RejectReason> {
    let checked = [
        ("price_open", proposal.price_open),
        ("price_take_profit", proposal.price_take_profit),
        ("price_stop_loss", proposal.price_stop_loss),
    ];
    for (field, value) in checked {
        if !value.is_finite() || value <= 0.0 {
            return Err(RejectReason::NonFinitePrice { field });
        }
    }

    match proposal.position {
        Position::Long => {
            if !(proposal.price_stop_loss < proposal.price_open
                && proposal.price_open < proposal.price_take_profit)
            {
                return Err(RejectReason::LongPriceOrder);
            }
        }
        Position::Short => {
            if !(proposal.price_take_profit < proposal.price_open
                && proposal.price_open < proposal.price_stop_loss)
            {
                return Err(RejectReason::ShortPriceOrder);
            }
        }
    }

    let tp_distance =
        (proposal.price_take_profit - proposal.price_open).abs() / proposal.price_open * 100.0;
    if tp_distance < config.min_take_profit_distance_percent {
        return Err(RejectReason::TakeProfitTooClose {
            distance_percent: tp_distance,
            min_percent: config.min_take_profit_distance_percent,
        });
    }
    if tp_distance > config.max_take_profit_distance_percent {
        return Err(RejectReason::TakeProfitTooFar {
            distance_percent: tp_distance,
            max_percent: config.max_take_profit_distance_percent,
        });
    }

    let sl_distance =
        (proposal.price_stop_loss - proposal.price_open).abs() / proposal.price_open * 100.0;
    if sl_distance < config.min_stop_loss_distance_percent {
        return Err(RejectReason::StopLossTooClose {
            distance_percent: sl_distance,
            min_percent: config.min_stop_loss_distance_percent,
        });
    }
    if sl_distance > config.max_stop_loss_distance_percent {
        return Err(RejectReason::StopLossTooFar {
            distance_percent: sl_distance,
            max_percent: config.max_stop_loss_distance_percent,
        });
    }

    if proposal.minute_estimated_time < 1
        || proposal.minute_estimated_time > config.max_signal_lifetime_minutes
    {
        return Err(RejectReason::LifetimeOutOfRange {
            minutes: proposal.minute_estimated_time,
            max_minutes: config.max_signal_lifetime_minutes,
        });
    }

    // A limit entry must wait on the correct side of the market: a long
    // waits for the price to fall toward its open, a short for a rise.
    let gap_percent = (proposal.price_open - vwap).abs() / vwap * 100.0;
    if gap_percent > config.schedule_price_epsilon_percent {
        let consistent = match proposal.position {
            Position::Long => vwap > proposal.price_open,
            Position::Short => vwap < proposal.price_open,
        };
        if !consistent {
            return Err(RejectReason::ScheduleGapDirection {
                position: proposal.position,
                price_open: proposal.price_open,
                vwap,
            });
        }
    }

    Ok(())
}
