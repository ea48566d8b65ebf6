//! Bounded retry policy with exponential backoff and jitter

use std::time::Duration;

use rand::Rng;

use crate::core::Config;

/// Backoff configuration for model calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum backoff cap
    pub max_delay: Duration,
    /// Multiplier per consecutive failure (typically 2.0)
    pub multiplier: f64,
    /// Fraction of the delay added at random, in `0.0..=1.0`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.llm.max_attempts.max(1),
            base_delay: Duration::from_millis(config.llm.retry_base_ms),
            max_delay: Duration::from_millis(config.llm.retry_max_ms),
            ..Default::default()
        }
    }

    /// Policy that retries immediately, for tests and local endpoints
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Deterministic part of the delay after `failures` consecutive failures
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay to sleep after `failures` consecutive failures, jitter included
    pub fn delay_for(&self, failures: u32) -> Duration {
        let backoff = self.backoff_for(failures);
        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let factor = rand::rng().random_range(0.0..=self.jitter.min(1.0));
        let jittered = backoff.as_secs_f64() * (1.0 + factor);
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_immediate_policy() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.delay_for(2).is_zero());
    }
}
