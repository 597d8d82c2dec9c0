use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the stream processing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Health tick interval in milliseconds.
    /// The engine reports Unhealthy once 2x this interval elapses
    /// without a tick.
    /// Default: 5000ms
    #[serde(default = "default_health_tick_interval_ms")]
    pub health_tick_interval_ms: u64,

    /// Retry policy for transient processing errors
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Bounded exponential backoff for transient processing errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries of one iteration before the error turns fatal
    /// Default: 8
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    /// Default: 10ms
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the retry delay (milliseconds)
    /// Default: 5000ms
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_health_tick_interval_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    8
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            health_tick_interval_ms: default_health_tick_interval_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_health_tick_interval(mut self, interval: Duration) -> Self {
        self.health_tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn health_tick_interval(&self) -> Duration {
        Duration::from_millis(self.health_tick_interval_ms)
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Delay before the given retry attempt (1-based), doubling from the
    /// initial delay and capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.health_tick_interval(), Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 8);
        assert_eq!(config.retry.initial_delay_ms, 10);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig::new()
            .with_initial_delay_ms(10)
            .with_max_delay_ms(50);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(40));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(50));
        assert_eq!(retry.delay_for_attempt(30), Duration::from_millis(50));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.health_tick_interval_ms, 5000);
        assert_eq!(config.retry.max_delay_ms, 5000);
    }
}
