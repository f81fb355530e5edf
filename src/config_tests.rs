use crate::config::Config;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.avg_price_candles_count > 0);
    assert!(config.min_take_profit_distance_percent < config.max_take_profit_distance_percent);
    assert!(config.min_stop_loss_distance_percent < config.max_stop_loss_distance_percent);
    assert!(config.max_signal_lifetime_minutes >= 1);
}

#[test]
fn default_epsilon_keeps_scheduled_entries_rare() {
    let config = Config::default();
    // A 0.01% gap on a 42 000 price is 4.2 price units; anything wider
    // must queue as a scheduled limit entry.
    assert!(config.schedule_price_epsilon_percent <= 0.01);
}

#[test]
fn round_trip_fee_is_double_the_per_side_fee() {
    let config = Config::default();
    assert!((2.0 * config.percent_fee - 0.2).abs() < f64::EPSILON);
}
