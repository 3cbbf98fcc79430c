//! Exponential backoff used by deletion retries and store-probe retries.

use std::time::Duration;

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
/// capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempt.min(31);
    base.checked_mul(1u32 << exp).unwrap_or(max).min(max)
}
