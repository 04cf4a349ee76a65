//! Queue configuration.
//!
//! Loaded from JSON (file or string) and then overridden by `SPINDLE_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, QueueError};

pub const ENV_WORKERS: &str = "SPINDLE_WORKERS";
pub const ENV_RETRIES: &str = "SPINDLE_RETRIES";
pub const ENV_SLEEP_MS: &str = "SPINDLE_SLEEP_MS";
pub const ENV_PRUNE_COMPLETED: &str = "SPINDLE_PRUNE_COMPLETED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    /// Number of worker loops, and capacity of the admission ring.
    pub workers: usize,

    /// Maximum attempts per task (at least 1).
    pub retries: u32,

    /// Fixed backoff between attempts, in milliseconds.
    pub sleep_ms: u64,

    /// Drop finished tasks from the admission ring before evicting.
    ///
    /// When false, entries leave the ring only by eviction.
    pub prune_completed: bool,

    /// Backoff with sub-millisecond precision; takes precedence over
    /// `sleep_ms` when set programmatically.
    #[serde(skip)]
    sleep_override: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retries: 3,
            sleep_ms: 100,
            prune_completed: false,
            sleep_override: None,
        }
    }
}

impl QueueConfig {
    pub fn new(workers: usize, retries: u32, sleep: Duration) -> Self {
        Self::default()
            .with_workers(workers)
            .with_retries(retries)
            .with_sleep(sleep)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep_ms = sleep.as_millis().try_into().unwrap_or(u64::MAX);
        self.sleep_override = Some(sleep);
        self
    }

    pub fn with_prune_completed(mut self, prune: bool) -> Self {
        self.prune_completed = prune;
        self
    }

    pub fn sleep(&self) -> Duration {
        self.sleep_override
            .unwrap_or_else(|| Duration::from_millis(self.sleep_ms))
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.workers == 0 {
            return Err(QueueError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.retries == 0 {
            return Err(QueueError::InvalidConfig(
                "retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, v)?;
        }
        if let Some(v) = lookup(ENV_RETRIES) {
            self.retries = parse_env(ENV_RETRIES, v)?;
        }
        if let Some(v) = lookup(ENV_SLEEP_MS) {
            self.sleep_ms = parse_env(ENV_SLEEP_MS, v)?;
            self.sleep_override = None;
        }
        if let Some(v) = lookup(ENV_PRUNE_COMPLETED) {
            self.prune_completed = parse_env(ENV_PRUNE_COMPLETED, v)?;
        }
        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sleep(), Duration::from_millis(100));
    }

    #[rstest]
    #[case(0, 3)]
    #[case(4, 0)]
    #[case(0, 0)]
    fn zero_workers_or_retries_is_rejected(#[case] workers: usize, #[case] retries: u32) {
        let config = QueueConfig::new(workers, retries, Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(QueueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn sub_millisecond_sleep_is_kept() {
        let config = QueueConfig::new(4, 999, Duration::from_nanos(10));
        assert_eq!(config.sleep(), Duration::from_nanos(10));
        assert_eq!(config.sleep_ms, 0);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = QueueConfig::from_json_str(r#"{ "workers": 8, "sleepMs": 5 }"#).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.retries, 3);
        assert_eq!(config.sleep(), Duration::from_millis(5));
        assert!(!config.prune_completed);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = QueueConfig::from_json_str("{ workers: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = QueueConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_WORKERS, "2"),
            (ENV_RETRIES, " 7 "),
            (ENV_SLEEP_MS, "15"),
            (ENV_PRUNE_COMPLETED, "true"),
        ]);
        let config = QueueConfig::new(4, 3, Duration::from_nanos(1))
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.retries, 7);
        assert_eq!(config.sleep(), Duration::from_millis(15));
        assert!(config.prune_completed);
    }

    #[test]
    fn bad_env_value_names_the_key() {
        let err = QueueConfig::default()
            .apply_env_with(|k| (k == ENV_RETRIES).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: ENV_RETRIES, .. }));
    }
}
