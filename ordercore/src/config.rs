//! Runtime configuration.
//!
//! Every tunable is a validated newtype, so an `OrderCoreConfig` value can
//! never hold an out-of-range setting. Values come from `Default`, from
//! serde (e.g. a config file) or from `ORDERCORE_*` environment variables.

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryConfig;

/// Maximum number of attempts for a retried operation, first try included.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxRetryAttempts(u32);

/// Delay before the first retry, in milliseconds.
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryBaseDelayMs(u64);

impl RetryBaseDelayMs {
    /// As a `Duration`.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Upper bound for any single retry delay, in milliseconds.
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 300_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryMaxDelayMs(u64);

impl RetryMaxDelayMs {
    /// As a `Duration`.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Growth factor between consecutive retry delays.
#[nutype(
    validate(greater_or_equal = 1.1, less_or_equal = 3.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BackoffMultiplier(f64);

/// Number of partition workers consuming inbound messages.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 256),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct WorkerCount(usize);

/// Bounded queue length per partition worker.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct QueueCapacity(usize);

/// How many outbox entries the relay reads per pass.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct OutboxBatchSize(usize);

/// A configuration value could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable held an unparsable or out-of-range value.
    #[error("invalid value {value:?} for {variable}: {reason}")]
    Invalid {
        /// The variable name
        variable: &'static str,
        /// The raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Top-level configuration for the order and inventory services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCoreConfig {
    /// Partition workers for inbound messages
    pub workers: WorkerCount,
    /// Queue length per worker
    pub queue_capacity: QueueCapacity,
    /// Outbox relay batch size
    pub outbox_batch_size: OutboxBatchSize,
    /// Backoff for optimistic-concurrency and transient retries
    pub retry: RetryConfig,
}

impl Default for OrderCoreConfig {
    fn default() -> Self {
        Self {
            workers: WorkerCount::try_new(8).expect("8 is a valid worker count"),
            queue_capacity: QueueCapacity::try_new(1024).expect("1024 is a valid capacity"),
            outbox_batch_size: OutboxBatchSize::try_new(100).expect("100 is a valid batch size"),
            retry: RetryConfig::default(),
        }
    }
}

impl OrderCoreConfig {
    /// Defaults overridden by any `ORDERCORE_*` variables that are set.
    ///
    /// Recognized: `ORDERCORE_WORKERS`, `ORDERCORE_QUEUE_CAPACITY`,
    /// `ORDERCORE_OUTBOX_BATCH_SIZE`, `ORDERCORE_RETRY_MAX_ATTEMPTS`,
    /// `ORDERCORE_RETRY_BASE_DELAY_MS`, `ORDERCORE_RETRY_MAX_DELAY_MS`,
    /// `ORDERCORE_RETRY_BACKOFF_MULTIPLIER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "ORDERCORE_WORKERS", WorkerCount::try_new)? {
            config.workers = v;
        }
        if let Some(v) = parse_var(&lookup, "ORDERCORE_QUEUE_CAPACITY", QueueCapacity::try_new)? {
            config.queue_capacity = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "ORDERCORE_OUTBOX_BATCH_SIZE",
            OutboxBatchSize::try_new,
        )? {
            config.outbox_batch_size = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "ORDERCORE_RETRY_MAX_ATTEMPTS",
            MaxRetryAttempts::try_new,
        )? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "ORDERCORE_RETRY_BASE_DELAY_MS",
            RetryBaseDelayMs::try_new,
        )? {
            config.retry.base_delay = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "ORDERCORE_RETRY_MAX_DELAY_MS",
            RetryMaxDelayMs::try_new,
        )? {
            config.retry.max_delay = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "ORDERCORE_RETRY_BACKOFF_MULTIPLIER",
            BackoffMultiplier::try_new,
        )? {
            config.retry.backoff_multiplier = v;
        }

        Ok(config)
    }
}

fn parse_var<F, B, T, R, E>(
    lookup: &F,
    variable: &'static str,
    build: B,
) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    B: FnOnce(R) -> Result<T, E>,
    R: std::str::FromStr,
    R::Err: std::fmt::Display,
    E: std::fmt::Display,
{
    let Some(raw) = lookup(variable) else {
        return Ok(None);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        variable,
        value: raw.clone(),
        reason,
    };
    let parsed = raw.trim().parse::<R>().map_err(|e| invalid(e.to_string()))?;
    build(parsed).map(Some).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = OrderCoreConfig::default();
        assert_eq!(usize::from(config.workers), 8);
        assert_eq!(usize::from(config.outbox_batch_size), 100);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = OrderCoreConfig::from_lookup(lookup(&[
            ("ORDERCORE_WORKERS", "4"),
            ("ORDERCORE_RETRY_MAX_ATTEMPTS", " 5 "),
            ("ORDERCORE_RETRY_BACKOFF_MULTIPLIER", "1.5"),
        ]))
        .unwrap();

        assert_eq!(usize::from(config.workers), 4);
        assert_eq!(u32::from(config.retry.max_attempts), 5);
        assert!((f64::from(config.retry.backoff_multiplier) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = OrderCoreConfig::from_lookup(lookup(&[("ORDERCORE_WORKERS", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                variable: "ORDERCORE_WORKERS",
                ..
            }
        ));

        assert!(
            OrderCoreConfig::from_lookup(lookup(&[("ORDERCORE_RETRY_MAX_ATTEMPTS", "many")]))
                .is_err()
        );
    }

    #[test]
    fn config_deserializes_with_validation() {
        let json = r#"{
            "workers": 2,
            "queue_capacity": 16,
            "outbox_batch_size": 10,
            "retry": {
                "max_attempts": 3,
                "base_delay": 10,
                "max_delay": 100,
                "backoff_multiplier": 2.0
            }
        }"#;
        let config: OrderCoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(usize::from(config.workers), 2);

        let bad = json.replace("\"workers\": 2", "\"workers\": 0");
        assert!(serde_json::from_str::<OrderCoreConfig>(&bad).is_err());
    }

    #[test]
    fn base_delay_converts_to_duration() {
        let delay = RetryBaseDelayMs::try_new(250).unwrap();
        assert_eq!(delay.as_duration(), Duration::from_millis(250));
    }
}
