//! Broker configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Configuration for a [`Broker`](crate::broker::Broker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum number of pipeline executions running at once.
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
    /// Whether to warn about events with no pipeline.
    #[serde(default = "default_log_missing_handlers")]
    pub log_missing_handlers: bool,
    /// Retry poller wake-up interval in milliseconds.
    #[serde(default = "default_retry_tick_ms")]
    pub retry_tick_ms: u64,
    /// How early a retry may be released, in milliseconds.
    #[serde(default = "default_retry_tolerance_ms")]
    pub retry_tolerance_ms: u64,
    /// Idle instances kept per pool. Defaults to the concurrency budget.
    #[serde(default)]
    pub pool_capacity: Option<usize>,
}

fn default_max_concurrent_handlers() -> usize {
    2
}

fn default_log_missing_handlers() -> bool {
    true
}

fn default_retry_tick_ms() -> u64 {
    10
}

fn default_retry_tolerance_ms() -> u64 {
    5
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: default_max_concurrent_handlers(),
            log_missing_handlers: default_log_missing_handlers(),
            retry_tick_ms: default_retry_tick_ms(),
            retry_tolerance_ms: default_retry_tolerance_ms(),
            pool_capacity: None,
        }
    }
}

impl BrokerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the concurrency budget.
    #[must_use]
    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max;
        self
    }

    /// Enables or disables the missing-handler warning.
    #[must_use]
    pub fn with_log_missing_handlers(mut self, enabled: bool) -> Self {
        self.log_missing_handlers = enabled;
        self
    }

    /// Sets the retry poller interval.
    #[must_use]
    pub fn with_retry_tick(mut self, tick: Duration) -> Self {
        self.retry_tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retry release tolerance.
    #[must_use]
    pub fn with_retry_tolerance(mut self, tolerance: Duration) -> Self {
        self.retry_tolerance_ms = u64::try_from(tolerance.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the pool capacity.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    /// Returns the retry poller interval.
    #[must_use]
    pub fn retry_tick(&self) -> Duration {
        Duration::from_millis(self.retry_tick_ms)
    }

    /// Returns the retry release tolerance.
    #[must_use]
    pub fn retry_tolerance(&self) -> Duration {
        Duration::from_millis(self.retry_tolerance_ms)
    }

    /// Returns the effective pool capacity.
    #[must_use]
    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity.unwrap_or(self.max_concurrent_handlers)
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_handlers == 0 || self.max_concurrent_handlers > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidConcurrency(self.max_concurrent_handlers));
        }
        if self.retry_tick_ms == 0 {
            return Err(ConfigError::InvalidRetryTiming(
                "retry_tick_ms must be positive".to_string(),
            ));
        }
        if self.retry_tolerance_ms > self.retry_tick_ms {
            return Err(ConfigError::InvalidRetryTiming(format!(
                "retry_tolerance_ms ({}) must not exceed retry_tick_ms ({})",
                self.retry_tolerance_ms, self.retry_tick_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();

        assert_eq!(config.max_concurrent_handlers, 2);
        assert!(config.log_missing_handlers);
        assert_eq!(config.retry_tick(), Duration::from_millis(10));
        assert_eq!(config.retry_tolerance(), Duration::from_millis(5));
        assert_eq!(config.pool_capacity(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = BrokerConfig::from_json(r#"{"max_concurrent_handlers": 8}"#).unwrap();

        assert_eq!(
            config,
            BrokerConfig::default().with_max_concurrent_handlers(8)
        );
        assert_eq!(config.pool_capacity(), 8);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            BrokerConfig::default().with_max_concurrent_handlers(0).validate(),
            Err(ConfigError::InvalidConcurrency(0))
        );
        assert!(matches!(
            BrokerConfig::default().with_retry_tick(Duration::ZERO).validate(),
            Err(ConfigError::InvalidRetryTiming(_))
        ));
        assert!(matches!(
            BrokerConfig::default()
                .with_retry_tolerance(Duration::from_millis(50))
                .validate(),
            Err(ConfigError::InvalidRetryTiming(_))
        ));
    }

    #[test]
    fn test_validation_rejects_budget_above_permit_limit() {
        let too_many = Semaphore::MAX_PERMITS + 1;

        assert_eq!(
            BrokerConfig::default().with_max_concurrent_handlers(too_many).validate(),
            Err(ConfigError::InvalidConcurrency(too_many))
        );
        assert!(BrokerConfig::default()
            .with_max_concurrent_handlers(Semaphore::MAX_PERMITS)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            BrokerConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            BrokerConfig::from_json(r#"{"max_concurrent_handlers": 0}"#),
            Err(ConfigError::InvalidConcurrency(0))
        ));
    }
}
