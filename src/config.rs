//! Configuration Module
//!
//! Cache options: process-wide defaults loaded from environment variables,
//! overridable per cache instance.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{EntryOptions, HardLimits, Strategy};
use crate::error::{CacheError, Result};

/// Stripe count used when `concurrency_level` is unset.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 16;

/// Cache configuration parameters.
///
/// Zero disables a count or size limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Options applied to entries added without their own
    pub default_entry: EntryOptions,
    /// Victim ordering for every reduction
    pub default_strategy: Strategy,
    /// Interval between tidy cycles
    #[serde(with = "serde_millis")]
    pub tidy_interval: Duration,
    /// Count enforced by the tidy worker
    pub soft_count_limit: usize,
    /// Count enforced before an add returns
    pub hard_count_limit: usize,
    pub soft_size_limit: i64,
    pub hard_size_limit: i64,
    /// Largest size a single entry may have
    pub max_item_size: i64,
    /// Entries older than this are removed by the tidy worker
    #[serde(with = "serde_millis::option")]
    pub age_limit: Option<Duration>,
    /// Entries not read for this long are removed by the tidy worker
    #[serde(with = "serde_millis::option")]
    pub idle_limit: Option<Duration>,
    /// Also dispose items on explicit removal, replacement and clear
    pub try_dispose_items_always: bool,
    /// Number of single-flight lock stripes
    pub concurrency_level: Option<usize>,
    /// Process memory target in bytes, used with a memory probe
    pub memory_limit: Option<u64>,
}

impl CacheOptions {
    /// Creates options by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `TIDY_CACHE_DEFAULT_TIMEOUT_SECS` - Default entry timeout (default: none)
    /// - `TIDY_CACHE_DEFAULT_SLIDING` - Sliding default timeout (default: false)
    /// - `TIDY_CACHE_STRATEGY` - `age`, `idle` or `largest` (default: age)
    /// - `TIDY_CACHE_TIDY_INTERVAL_MS` - Tidy cycle interval (default: 1000)
    /// - `TIDY_CACHE_SOFT_COUNT_LIMIT` / `TIDY_CACHE_HARD_COUNT_LIMIT` (default: 0)
    /// - `TIDY_CACHE_SOFT_SIZE_LIMIT` / `TIDY_CACHE_HARD_SIZE_LIMIT` (default: 0)
    /// - `TIDY_CACHE_MAX_ITEM_SIZE` (default: 0)
    /// - `TIDY_CACHE_AGE_LIMIT_SECS` / `TIDY_CACHE_IDLE_LIMIT_SECS` (default: none)
    /// - `TIDY_CACHE_TRY_DISPOSE_ALWAYS` (default: false)
    /// - `TIDY_CACHE_CONCURRENCY_LEVEL` (default: 16)
    /// - `TIDY_CACHE_MEMORY_LIMIT` (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_entry: EntryOptions {
                timeout: env_parse("TIDY_CACHE_DEFAULT_TIMEOUT_SECS").map(Duration::from_secs),
                sliding: env_parse("TIDY_CACHE_DEFAULT_SLIDING"),
                ..defaults.default_entry
            },
            default_strategy: env_parse("TIDY_CACHE_STRATEGY").unwrap_or(defaults.default_strategy),
            tidy_interval: env_parse("TIDY_CACHE_TIDY_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tidy_interval),
            soft_count_limit: env_parse("TIDY_CACHE_SOFT_COUNT_LIMIT").unwrap_or(0),
            hard_count_limit: env_parse("TIDY_CACHE_HARD_COUNT_LIMIT").unwrap_or(0),
            soft_size_limit: env_parse("TIDY_CACHE_SOFT_SIZE_LIMIT").unwrap_or(0),
            hard_size_limit: env_parse("TIDY_CACHE_HARD_SIZE_LIMIT").unwrap_or(0),
            max_item_size: env_parse("TIDY_CACHE_MAX_ITEM_SIZE").unwrap_or(0),
            age_limit: env_parse("TIDY_CACHE_AGE_LIMIT_SECS").map(Duration::from_secs),
            idle_limit: env_parse("TIDY_CACHE_IDLE_LIMIT_SECS").map(Duration::from_secs),
            try_dispose_items_always: env_parse("TIDY_CACHE_TRY_DISPOSE_ALWAYS").unwrap_or(false),
            concurrency_level: env_parse("TIDY_CACHE_CONCURRENCY_LEVEL"),
            memory_limit: env_parse("TIDY_CACHE_MEMORY_LIMIT"),
        }
    }

    // == Validate ==
    /// Rejects contradictory settings.
    pub fn validate(&self) -> Result<()> {
        if self.tidy_interval.is_zero() {
            return Err(CacheError::InvalidRequest(
                "tidy_interval must be greater than zero".to_string(),
            ));
        }
        if self.hard_count_limit > 0 && self.soft_count_limit > self.hard_count_limit {
            return Err(CacheError::InvalidRequest(format!(
                "soft_count_limit {} exceeds hard_count_limit {}",
                self.soft_count_limit, self.hard_count_limit
            )));
        }
        if self.hard_size_limit > 0 && self.soft_size_limit > self.hard_size_limit {
            return Err(CacheError::InvalidRequest(format!(
                "soft_size_limit {} exceeds hard_size_limit {}",
                self.soft_size_limit, self.hard_size_limit
            )));
        }
        if self.soft_size_limit < 0 || self.hard_size_limit < 0 || self.max_item_size < 0 {
            return Err(CacheError::InvalidRequest(
                "size limits must not be negative".to_string(),
            ));
        }
        if self.concurrency_level == Some(0) {
            return Err(CacheError::InvalidRequest(
                "concurrency_level must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hard_limits(&self) -> HardLimits {
        HardLimits {
            count: self.hard_count_limit,
            size: self.hard_size_limit,
            max_item_size: self.max_item_size,
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.concurrency_level.unwrap_or(DEFAULT_CONCURRENCY_LEVEL)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            default_entry: EntryOptions::default(),
            default_strategy: Strategy::Age,
            tidy_interval: Duration::from_secs(1),
            soft_count_limit: 0,
            hard_count_limit: 0,
            soft_size_limit: 0,
            hard_size_limit: 0,
            max_item_size: 0,
            age_limit: None,
            idle_limit: None,
            try_dispose_items_always: false,
            concurrency_level: None,
            memory_limit: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// == Duration Serde ==
/// Serializes a `Duration` as whole milliseconds.
pub mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = CacheOptions::default();
        assert_eq!(options.tidy_interval, Duration::from_secs(1));
        assert_eq!(options.default_strategy, Strategy::Age);
        assert_eq!(options.hard_count_limit, 0);
        assert!(!options.hard_limits().is_active());
        assert_eq!(options.stripe_count(), DEFAULT_CONCURRENCY_LEVEL);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_from_env() {
        let vars = [
            "TIDY_CACHE_HARD_COUNT_LIMIT",
            "TIDY_CACHE_STRATEGY",
            "TIDY_CACHE_TIDY_INTERVAL_MS",
            "TIDY_CACHE_AGE_LIMIT_SECS",
        ];
        for var in vars {
            env::remove_var(var);
        }

        let options = CacheOptions::from_env();
        assert_eq!(options.hard_count_limit, 0);
        assert_eq!(options.default_strategy, Strategy::Age);
        assert_eq!(options.tidy_interval, Duration::from_secs(1));

        env::set_var("TIDY_CACHE_HARD_COUNT_LIMIT", "50");
        env::set_var("TIDY_CACHE_STRATEGY", "idle");
        env::set_var("TIDY_CACHE_TIDY_INTERVAL_MS", "250");
        env::set_var("TIDY_CACHE_AGE_LIMIT_SECS", "not-a-number");

        let options = CacheOptions::from_env();
        assert_eq!(options.hard_count_limit, 50);
        assert_eq!(options.default_strategy, Strategy::Idle);
        assert_eq!(options.tidy_interval, Duration::from_millis(250));
        assert_eq!(options.age_limit, None);

        for var in vars {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_validate_rejects_soft_above_hard() {
        let options = CacheOptions {
            soft_count_limit: 10,
            hard_count_limit: 5,
            ..CacheOptions::default()
        };
        assert!(matches!(options.validate(), Err(CacheError::InvalidRequest(_))));

        let options = CacheOptions {
            tidy_interval: Duration::ZERO,
            ..CacheOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "hard_count_limit": 3,
            "tidy_interval": 500,
            "idle_limit": 60000,
            "default_strategy": "largest",
            "default_entry": { "timeout": 1000, "sliding": true }
        }"#;
        let options: CacheOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.hard_count_limit, 3);
        assert_eq!(options.tidy_interval, Duration::from_millis(500));
        assert_eq!(options.idle_limit, Some(Duration::from_secs(60)));
        assert_eq!(options.default_strategy, Strategy::Largest);
        assert_eq!(options.default_entry.timeout, Some(Duration::from_secs(1)));
        assert_eq!(options.default_entry.sliding, Some(true));
        assert_eq!(options.soft_size_limit, 0);
    }
}
