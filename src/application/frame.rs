//! Frame timeline generation for backtests.

use crate::domain::types::MS_PER_MINUTE;
use crate::domain::schema::FrameSchema;

/// Ordered execution timestamps for a frame: `start`, `start + step`, …,
/// strictly before `end`.
pub fn timeline(frame: &FrameSchema) -> Vec<i64> {
    let step = (frame.interval_minutes.max(1)) as i64 * MS_PER_MINUTE;
    let start = frame.start_date.timestamp_millis();
    let end = frame.end_date.timestamp_millis();

    let mut timestamps = Vec::new();
    let mut t = start;
    while t < end {
        timestamps.push(t);
        t += step;
    }
    timestamps
}
