//! Reconnect backoff.

use std::time::Duration;

use rand::Rng;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Default upper bound for reconnect delays.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default jitter fraction.
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.2;

/// Exponential backoff with a cap and downward jitter.
///
/// Attempt `n` (starting at 1) waits `min(base * 2^(n-1), max)`, reduced by
/// a random fraction of at most `jitter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    /// Create a backoff policy. `jitter` is clamped to `0.0..=1.0` and
    /// `max` is raised to at least `base`.
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            base,
            max: max.max(base),
            jitter,
        }
    }

    /// The same policy without jitter.
    pub fn without_jitter(self) -> Self {
        Self { jitter: 0.0, ..self }
    }

    /// The upper bound for any delay.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// The delay before attempt `attempt`, before jitter is applied.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// The jittered delay before attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if self.jitter == 0.0 {
            return ceiling;
        }

        let reduction = rand::thread_rng().gen_range(0.0..=self.jitter);
        ceiling.mul_f64(1.0 - reduction)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            DEFAULT_BACKOFF_JITTER,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.0);

        let delays: Vec<u64> = (1..=6).map(|n| backoff.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.ceiling(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(60), 0.5);

        for attempt in 1..=8 {
            let ceiling = backoff.ceiling(attempt);
            let delay = backoff.delay(attempt);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
    }

    #[test]
    fn test_new_normalizes_arguments() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 7.0);
        assert_eq!(backoff.ceiling(1), Duration::from_secs(5));
        assert_eq!(backoff.ceiling(3), Duration::from_secs(5));
        assert_eq!(backoff, Backoff::new(Duration::from_secs(5), Duration::from_secs(5), 1.0));
        assert_eq!(backoff.without_jitter().delay(1), Duration::from_secs(5));
    }
}
