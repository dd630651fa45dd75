//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Pre-jitter delay for a 1-based attempt number.
///
/// `delay(1) = base`, `delay(n) = base * multiplier^(n-1)`, never above `max`.
pub fn exponential_delay(attempt: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = multiplier.max(1.0).powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
    let delay_ms = base.as_millis() as f64 * factor;
    let max_ms = max.as_millis() as f64;

    if !delay_ms.is_finite() || delay_ms >= max_ms {
        max
    } else {
        Duration::from_millis(delay_ms as u64)
    }
}

/// Randomize `delay` within ±50%, never exceeding `max`.
pub fn apply_jitter(delay: Duration, max: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 2 {
        return delay.min(max);
    }

    let low = millis / 2;
    let high = millis + millis / 2;
    let jittered = rand::thread_rng().gen_range(low..=high);

    Duration::from_millis(jittered).min(max)
}

/// Queue rescheduling delay after `attempts` failed attempts (doubling, capped).
pub fn queue_backoff(attempts: u32, base: Duration, max: Duration) -> Duration {
    exponential_delay(attempts, base, 2.0, max)
}
