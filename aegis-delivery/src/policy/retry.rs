//! Opt-in retry policy for temporary delivery failures.
//!
//! Without a policy every claim is terminal: the failure is recorded and the
//! job acknowledged. With one, temporary failures are deferred with
//! exponential backoff until `max_attempts` claims have been made.

use std::time::{Duration, SystemTime};

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts before giving up.
    ///
    /// Default: 5 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in seconds).
    ///
    /// The actual delay is calculated as: `base * 2^(attempts - 1)`
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Cap on the backoff (in seconds).
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Delays are randomised within ±`retry_jitter_factor`.
    ///
    /// Default: 0.2 (±20%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Whether a job that has been claimed `attempts` times may be tried again.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff before the next attempt, after `attempts` claims (1-indexed).
    ///
    /// `min(base * 2^(attempts - 1), max) * (1 ± jitter)`
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_retry_delay_secs
        } else {
            self.base_retry_delay_secs
                .saturating_mul(1u64 << exponent)
                .min(self.max_retry_delay_secs)
        };

        let jitter_factor = self.retry_jitter_factor.clamp(0.0, 1.0);
        if jitter_factor.is_nan() || jitter_factor <= 0.0 {
            return Duration::from_secs(delay);
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let range = (delay as f64) * jitter_factor;
            let jitter: f64 = rand::rng().random_range(-range..=range);
            ((delay as f64) + jitter).max(0.0) as u64
        };

        Duration::from_secs(jittered)
    }

    /// When the next attempt should happen
    #[must_use]
    pub fn next_retry_at(&self, attempts: u32) -> SystemTime {
        SystemTime::now() + self.backoff(attempts)
    }

    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn base_retry_delay_secs() -> u64 {
        60
    }

    pub const fn max_retry_delay_secs() -> u64 {
        3600
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_retry_delay_secs: 60,
            max_retry_delay_secs: 600,
            retry_jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_retry_delay_secs, 60);
        assert_eq!(policy.max_retry_delay_secs, 3600);
        assert!((policy.retry_jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry() {
        let policy = policy();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!policy.should_retry(50));

        assert_eq!(policy.remaining_attempts(2), 3);
        assert_eq!(policy.remaining_attempts(9), 0);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy();

        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        assert_eq!(policy.backoff(3), Duration::from_secs(240));
        assert_eq!(policy.backoff(4), Duration::from_secs(480));
        // Capped
        assert_eq!(policy.backoff(5), Duration::from_secs(600));
        assert_eq!(policy.backoff(200), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            retry_jitter_factor: 0.5,
            ..policy()
        };

        for _ in 0..100 {
            let delay = policy.backoff(2).as_secs();
            assert!((60..=180).contains(&delay), "{delay} outside ±50% of 120");
        }
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: RetryPolicy = ron::from_str("(max_attempts: 3)").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_retry_delay_secs, 60);
    }
}
