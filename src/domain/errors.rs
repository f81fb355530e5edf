use thiserror::Error;

/// Errors surfaced by the exchange gateway and raw candle adapters.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("No candles available for {symbol}")]
    NoData { symbol: String },

    #[error("Invalid candle data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("Price anomaly for {symbol}: close {close} deviates from median {median} beyond factor {factor}")]
    PriceAnomaly {
        symbol: String,
        close: f64,
        median: f64,
        factor: f64,
    },

    #[error("Candle fetch failed for {symbol} after {attempts} attempts: {reason}")]
    FetchFailed {
        symbol: String,
        attempts: u32,
        reason: String,
    },

    #[error("Transient candle fetch error for {symbol}: {reason}")]
    Transient { symbol: String, reason: String },

    #[error("Forward candles were requested outside of backtest mode for {symbol}")]
    ForwardFetchInLive { symbol: String },

    #[error("Order book depth is not available for {symbol} on this adapter")]
    OrderBookUnsupported { symbol: String },
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient { .. })
    }
}

/// Errors surfaced by the persistence slots.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to write slot {slot}: {reason}")]
    WriteFailed { slot: String, reason: String },

    #[error("Failed to read slot {slot}: {reason}")]
    ReadFailed { slot: String, reason: String },

    /// The slot held unparseable data. The backend has already deleted it;
    /// callers proceed with an empty slot.
    #[error("Corrupt slot {slot} was discarded: {reason}")]
    Corrupt { slot: String, reason: String },
}

/// Lifecycle-affecting tick failures. Everything else is absorbed inside
/// the tick and reported on the error channel.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// A state transition could not be committed. The in-memory state is
    /// unchanged and the outcome must not be yielded.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
