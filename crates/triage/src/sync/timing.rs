//! Scheduling arithmetic for cooldowns and failure backoff
//!
//! Pure functions that can be tested without a running task.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Check if enough time has elapsed since the last cycle to allow a new one.
///
/// # Arguments
/// * `last_cycle_at` - When the last cycle committed (None if never synced)
/// * `cooldown` - Minimum time that must elapse between cycles
///
/// # Returns
/// `true` if enough time has passed (or never synced), `false` if still in cooldown
pub fn cooldown_elapsed(last_cycle_at: Option<DateTime<Utc>>, cooldown: Duration) -> bool {
    match last_cycle_at {
        Some(last) => {
            let elapsed = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
            elapsed >= cooldown
        }
        None => true,
    }
}

/// Delay before the next attempt after a failed cycle
///
/// Doubles the previous delay, starting from `interval` and capped at `max`.
pub fn next_backoff(previous: Duration, interval: Duration, max: Duration) -> Duration {
    let base = previous.max(interval);
    base.saturating_mul(2).min(max.max(interval))
}
