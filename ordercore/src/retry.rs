//! Retry configuration and policies for storage writes.
//!
//! Every effect behind the storage traits is idempotent, so blind retry is
//! always safe. The policy only decides which failures are worth retrying.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{BackoffMultiplier, MaxRetryAttempts, RetryBaseDelayMs, RetryMaxDelayMs};
use crate::errors::StoreError;

/// Backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts including the first one.
    pub max_attempts: MaxRetryAttempts,
    /// Delay before the first retry.
    pub base_delay: RetryBaseDelayMs,
    /// Cap for any single delay.
    pub max_delay: RetryMaxDelayMs,
    /// Growth factor between delays.
    pub backoff_multiplier: BackoffMultiplier,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MaxRetryAttempts::try_new(5).expect("5 is a valid attempt count"),
            base_delay: RetryBaseDelayMs::try_new(20).expect("20ms is a valid base delay"),
            max_delay: RetryMaxDelayMs::try_new(2_000).expect("2s is a valid max delay"),
            backoff_multiplier: BackoffMultiplier::try_new(2.0)
                .expect("2.0 is a valid multiplier"),
        }
    }
}

impl RetryConfig {
    /// Number of attempts, first one included.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.into()
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    ///
    /// Exponential in `attempt`, capped at `max_delay`, with ±25% jitter.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_duration().as_millis() as f64;
        let max_ms = self.max_delay.as_duration().as_millis() as f64;
        let multiplier: f64 = self.backoff_multiplier.into();

        let delay = (base_ms * multiplier.powi(attempt as i32)).min(max_ms);

        let jitter = delay * 0.25 * (rand::rng().random::<f64>() - 0.5) * 2.0;
        let final_ms = (delay + jitter).clamp(0.0, max_ms) as u64;

        Duration::from_millis(final_ms)
    }
}

/// Which storage failures trigger a retry.
#[derive(Debug, Clone, Copy, Default)]
pub enum RetryPolicy {
    /// Only optimistic-concurrency conflicts.
    ConcurrencyConflictsOnly,
    /// Conflicts and transient infrastructure failures.
    #[default]
    ConcurrencyAndTransient,
    /// Custom predicate.
    Custom(fn(&StoreError) -> bool),
}

impl RetryPolicy {
    /// Whether `error` should be retried.
    pub fn should_retry(&self, error: &StoreError) -> bool {
        match self {
            Self::ConcurrencyConflictsOnly => matches!(error, StoreError::VersionConflict { .. }),
            Self::ConcurrencyAndTransient => {
                matches!(error, StoreError::VersionConflict { .. }) || error.is_transient()
            }
            Self::Custom(predicate) => predicate(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: u64, max: u64, multiplier: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: MaxRetryAttempts::try_new(5).unwrap(),
            base_delay: RetryBaseDelayMs::try_new(base).unwrap(),
            max_delay: RetryMaxDelayMs::try_new(max).unwrap(),
            backoff_multiplier: BackoffMultiplier::try_new(multiplier).unwrap(),
        }
    }

    #[test]
    fn delays_grow_roughly_exponentially() {
        let config = config(100, 100_000, 2.0);
        for _ in 0..20 {
            let first = config.delay_for(0).as_millis();
            let third = config.delay_for(2).as_millis();
            assert!((74..=125).contains(&first), "first delay {first}");
            assert!((299..=500).contains(&third), "third delay {third}");
        }
    }

    #[test]
    fn delays_never_exceed_cap() {
        let config = config(1_000, 1_500, 3.0);
        for attempt in 0..10 {
            assert!(config.delay_for(attempt) <= Duration::from_millis(1_500));
        }
    }

    #[test]
    fn policies_classify_store_errors() {
        let conflict = StoreError::VersionConflict {
            key: "order-1".into(),
            expected: 2,
        };
        let down = StoreError::Unavailable("connection refused".into());
        let bug = StoreError::Internal("bad row".into());

        assert!(RetryPolicy::ConcurrencyConflictsOnly.should_retry(&conflict));
        assert!(!RetryPolicy::ConcurrencyConflictsOnly.should_retry(&down));

        assert!(RetryPolicy::ConcurrencyAndTransient.should_retry(&conflict));
        assert!(RetryPolicy::ConcurrencyAndTransient.should_retry(&down));
        assert!(!RetryPolicy::ConcurrencyAndTransient.should_retry(&bug));

        let only_internal = RetryPolicy::Custom(|e| matches!(e, StoreError::Internal(_)));
        assert!(only_internal.should_retry(&bug));
        assert!(!only_internal.should_retry(&conflict));
    }
}
