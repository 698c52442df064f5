//! Exponential backoff between polling attempts.

use std::time::Duration;

use crate::config::PollingConfig;

/// Delay before the next attempt, given the attempts already made.
///
/// `min(interval_ms × multiplier^attempts, max_backoff_ms)`, rounded to the
/// nearest millisecond. The first attempt uses `attempts = 0`.
pub fn next_delay(config: &PollingConfig, attempts: u32) -> Duration {
    let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
    let raw = config.interval_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = if raw.is_finite() {
        raw.min(config.max_backoff_ms as f64)
    } else {
        config.max_backoff_ms as f64
    };
    Duration::from_millis(capped.round() as u64)
}
