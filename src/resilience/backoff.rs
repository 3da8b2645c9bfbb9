//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max_ms`, plus up to 10% jitter. Attempt 0 waits nothing.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let Some(exponent) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent)).min(max_ms);

    let jitter_ceiling = delay_ms / 10;
    let jitter_ms = if jitter_ceiling == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_ceiling)
    };
    Duration::from_millis(delay_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_start_schedule() {
        let first = calculate_backoff(1, 1000, 8000).as_millis();
        assert!((1000..1100).contains(&first));

        let third = calculate_backoff(3, 1000, 8000).as_millis();
        assert!((4000..4400).contains(&third));
    }

    #[test]
    fn test_cap_and_zero_attempt() {
        assert_eq!(calculate_backoff(0, 1000, 8000), Duration::ZERO);
        let capped = calculate_backoff(40, 1000, 8000).as_millis();
        assert!((8000..8800).contains(&capped));
        assert_eq!(calculate_backoff(5, 0, 0), Duration::ZERO);
    }
}
