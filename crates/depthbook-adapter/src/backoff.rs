/*
[INPUT]:  Attempt counter and backoff bounds
[OUTPUT]: Capped exponential delay
[POS]:    Shared helper - reconnect and refetch pacing
[UPDATE]: When changing the backoff curve
*/

use std::time::Duration;

/// Exponential backoff: `initial * 2^(attempt - 1)`, clamped to `max`.
///
/// Attempt `0` yields zero so a first try can go out immediately.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(31);
    initial
        .checked_mul(1u32 << exp)
        .unwrap_or(max)
        .min(max)
}
