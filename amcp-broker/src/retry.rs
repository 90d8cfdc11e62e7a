//! Exponential backoff with jitter for reliable delivery (§4.9).
//!
//! Grounded on `llmspell-hooks::builtin::retry::BackoffStrategy::Exponential`
//! and `JitterStrategy`, narrowed to spec.md §4.9's exact policy: base
//! 100ms, factor 2, cap 30s, max attempts 5.

use std::time::Duration;

use rand::Rng;

/// Retry policy for reliable delivery (§4.9, §6 config surface).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// The full-jitter delay before retry attempt `attempt` (1-indexed:
    /// the delay before the *second* invocation is `delay_for(1)`).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let raw_ms = (self.base_delay.as_millis() as f64 * exp).min(self.cap.as_millis() as f64);
        let jittered_ms = rand::thread_rng().gen_range(0.0..=raw_ms.max(1.0));
        Duration::from_millis(jittered_ms as u64)
    }

    /// Whether another attempt is permitted after `attempts_made` have
    /// already run.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_but_respects_cap() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10 {
            let delay = policy.delay_for(attempt);
            assert!(delay <= policy.cap);
        }
    }

    #[test]
    fn max_attempts_defaults_to_five() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }
}
