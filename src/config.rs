use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Relay tuning.
///
/// # Environment
///
/// [`RelayConfig::from_env`] reads, all optional:
///
/// - `OUTBOX_RELAY_POLL_INTERVAL_MS`: default 10000
/// - `OUTBOX_RELAY_BATCH_SIZE`: default 100
/// - `OUTBOX_RELAY_PUBLISH_TIMEOUT_MS`: default 5000
/// - `OUTBOX_RELAY_MAX_ATTEMPTS`: unset retries forever
/// - `OUTBOX_RELAY_RETENTION_SECS`: unset keeps processed rows forever
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Time between the start of two cycles.
    pub poll_interval: Duration,
    /// Upper bound on rows loaded per cycle.
    pub batch_size: usize,
    /// Deadline for a single broker acknowledgment.
    pub publish_timeout: Duration,
    /// Failed attempts after which a row is quarantined.
    pub max_attempts: Option<u32>,
    /// Age after which processed rows are purged.
    pub retention: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 100,
            publish_timeout: Duration::from_secs(5),
            max_attempts: None,
            retention: None,
        }
    }
}

impl RelayConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults for missing keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            poll_interval: parse::<u64>(&lookup, "OUTBOX_RELAY_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            batch_size: parse(&lookup, "OUTBOX_RELAY_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            publish_timeout: parse::<u64>(&lookup, "OUTBOX_RELAY_PUBLISH_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            max_attempts: parse(&lookup, "OUTBOX_RELAY_MAX_ATTEMPTS")?,
            retention: parse::<u64>(&lookup, "OUTBOX_RELAY_RETENTION_SECS")?
                .map(Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval",
                value: "0".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size",
                value: "0".into(),
            });
        }
        if self.publish_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "publish_timeout",
                value: "0".into(),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn missing_keys_use_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_attempts, None);
    }

    #[test]
    fn keys_override_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("OUTBOX_RELAY_POLL_INTERVAL_MS", "250"),
            ("OUTBOX_RELAY_BATCH_SIZE", "10"),
            ("OUTBOX_RELAY_MAX_ATTEMPTS", "5"),
            ("OUTBOX_RELAY_RETENTION_SECS", "3600"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_attempts, Some(5));
        assert_eq!(config.retention, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn garbage_is_reported_with_its_key() {
        let err = RelayConfig::from_lookup(lookup(&[("OUTBOX_RELAY_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "OUTBOX_RELAY_BATCH_SIZE", ref value } if value == "lots"
        ));
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let err = RelayConfig::default().with_batch_size(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "batch_size", .. }));
    }

    #[test]
    fn zero_publish_timeout_is_invalid() {
        let err = RelayConfig::from_lookup(lookup(&[("OUTBOX_RELAY_PUBLISH_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "publish_timeout",
                ..
            }
        ));
    }

    #[test]
    fn deserializes_partial_json() {
        let config: RelayConfig = serde_json::from_str(r#"{"batch_size": 25}"#).unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
    }
}
