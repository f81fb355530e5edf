use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Process-wide settings bundle. Read once at startup via [`Config::from_env`]
/// and passed around as `Arc<Config>`; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum minutes a scheduled (limit-entry) signal may wait for
    /// activation before it is cancelled with a timeout reason.
    pub schedule_await_minutes: u64,
    /// Number of trailing 1-minute candles in the VWAP window.
    pub avg_price_candles_count: usize,
    /// Per-side slippage percentage applied to open and close prices.
    pub percent_slippage: f64,
    /// Per-side fee percentage; a round trip costs twice this.
    pub percent_fee: f64,
    pub min_take_profit_distance_percent: f64,
    pub max_take_profit_distance_percent: f64,
    pub min_stop_loss_distance_percent: f64,
    pub max_stop_loss_distance_percent: f64,
    /// Upper bound for `minute_estimated_time` on proposals.
    pub max_signal_lifetime_minutes: u64,
    /// Timeout for the user signal-generator callback.
    pub max_signal_generation_seconds: u64,
    pub get_candles_retry_count: u32,
    pub get_candles_retry_delay_ms: u64,
    pub max_candles_per_request: usize,
    /// A candle whose close deviates from the window median by more than
    /// this factor is treated as a feed anomaly.
    pub price_anomaly_threshold_factor: f64,
    /// Median-deviation check is skipped below this many candles.
    pub min_candles_for_median: usize,
    /// Gross revenue percentage at which the stop loss moves to breakeven.
    pub breakeven_threshold: f64,
    /// Relative gap (percent of VWAP) under which a proposal opens
    /// immediately instead of being queued as a scheduled limit entry.
    pub schedule_price_epsilon_percent: f64,
    /// Root directory for the default file persistence backend.
    pub persist_dir: PathBuf,
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {} ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            schedule_await_minutes: parse_var("CC_SCHEDULE_AWAIT_MINUTES", 120u64)?,
            avg_price_candles_count: parse_var("CC_AVG_PRICE_CANDLES_COUNT", 5usize)?,
            percent_slippage: parse_var("CC_PERCENT_SLIPPAGE", 0.1f64)?,
            percent_fee: parse_var("CC_PERCENT_FEE", 0.1f64)?,
            min_take_profit_distance_percent: parse_var(
                "CC_MIN_TAKEPROFIT_DISTANCE_PERCENT",
                0.5f64,
            )?,
            max_take_profit_distance_percent: parse_var(
                "CC_MAX_TAKEPROFIT_DISTANCE_PERCENT",
                20.0f64,
            )?,
            min_stop_loss_distance_percent: parse_var("CC_MIN_STOPLOSS_DISTANCE_PERCENT", 0.5f64)?,
            max_stop_loss_distance_percent: parse_var("CC_MAX_STOPLOSS_DISTANCE_PERCENT", 20.0f64)?,
            max_signal_lifetime_minutes: parse_var("CC_MAX_SIGNAL_LIFETIME_MINUTES", 1440u64)?,
            max_signal_generation_seconds: parse_var("CC_MAX_SIGNAL_GENERATION_SECONDS", 60u64)?,
            get_candles_retry_count: parse_var("CC_GET_CANDLES_RETRY_COUNT", 3u32)?,
            get_candles_retry_delay_ms: parse_var("CC_GET_CANDLES_RETRY_DELAY_MS", 500u64)?,
            max_candles_per_request: parse_var("CC_MAX_CANDLES_PER_REQUEST", 1000usize)?,
            price_anomaly_threshold_factor: parse_var(
                "CC_GET_CANDLES_PRICE_ANOMALY_THRESHOLD_FACTOR",
                3.0f64,
            )?,
            min_candles_for_median: parse_var("CC_GET_CANDLES_MIN_CANDLES_FOR_MEDIAN", 10usize)?,
            breakeven_threshold: parse_var("CC_BREAKEVEN_THRESHOLD", 1.0f64)?,
            schedule_price_epsilon_percent: parse_var(
                "CC_SCHEDULE_PRICE_EPSILON_PERCENT",
                0.01f64,
            )?,
            persist_dir: PathBuf::from(
                env::var("CC_PERSIST_DIR").unwrap_or_else(|_| "./.sigtrade".to_string()),
            ),
        };

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.avg_price_candles_count == 0 {
            anyhow::bail!("CC_AVG_PRICE_CANDLES_COUNT must be at least 1");
        }
        if self.percent_slippage < 0.0 || self.percent_fee < 0.0 {
            anyhow::bail!("Slippage and fee percentages must be non-negative");
        }
        if self.min_take_profit_distance_percent <= 0.0
            || self.min_stop_loss_distance_percent <= 0.0
        {
            anyhow::bail!("Minimum TP/SL distance bands must be positive");
        }
        if self.max_take_profit_distance_percent <= self.min_take_profit_distance_percent {
            anyhow::bail!(
                "CC_MAX_TAKEPROFIT_DISTANCE_PERCENT must exceed the minimum band ({} <= {})",
                self.max_take_profit_distance_percent,
                self.min_take_profit_distance_percent
            );
        }
        if self.max_stop_loss_distance_percent <= self.min_stop_loss_distance_percent {
            anyhow::bail!(
                "CC_MAX_STOPLOSS_DISTANCE_PERCENT must exceed the minimum band ({} <= {})",
                self.max_stop_loss_distance_percent,
                self.min_stop_loss_distance_percent
            );
        }
        if self.max_signal_lifetime_minutes == 0 {
            anyhow::bail!("CC_MAX_SIGNAL_LIFETIME_MINUTES must be at least 1");
        }
        if self.schedule_price_epsilon_percent < 0.0 {
            anyhow::bail!("CC_SCHEDULE_PRICE_EPSILON_PERCENT must be non-negative");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schedule_await_minutes: 120,
            avg_price_candles_count: 5,
            percent_slippage: 0.1,
            percent_fee: 0.1,
            min_take_profit_distance_percent: 0.5,
            max_take_profit_distance_percent: 20.0,
            min_stop_loss_distance_percent: 0.5,
            max_stop_loss_distance_percent: 20.0,
            max_signal_lifetime_minutes: 1440,
            max_signal_generation_seconds: 60,
            get_candles_retry_count: 3,
            get_candles_retry_delay_ms: 500,
            max_candles_per_request: 1000,
            price_anomaly_threshold_factor: 3.0,
            min_candles_for_median: 10,
            breakeven_threshold: 1.0,
            schedule_price_epsilon_percent: 0.01,
            persist_dir: PathBuf::from("./.sigtrade"),
        }
    }
}
