//! Millisecond timestamp helpers shared by the time base and producers.

use std::time::Duration;

/// Milliseconds since the time base started.
pub type Millis = u64;

/// Convert a duration to whole milliseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_to_millis(d: Duration) -> Millis {
    u64::try_from(d.as_millis()).unwrap_or(Millis::MAX)
}

/// Absolute due time for a task delayed by `delay` from `now`.
#[must_use]
pub fn due_after(now: Millis, delay: Duration) -> Millis {
    now.saturating_add(duration_to_millis(delay))
}
