use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ResilienceError, Result};
use crate::hedge::HedgedRequestConfig;
use crate::retry::RetryStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Resilience configuration for one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Per-endpoint circuit breaker settings
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Disable circuit breaking entirely
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,
    /// Retry strategy and budget
    #[serde(default)]
    pub retry: RetryStrategy,
    /// Hedged requests (disabled when absent)
    #[serde(default)]
    pub hedging: Option<HedgedRequestConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            circuit_breaker_enabled: true,
            retry: RetryStrategy::default(),
            hedging: None,
        }
    }
}

impl ResilienceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResilienceError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ResilienceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(ResilienceError::Config(
                "Circuit breaker failure_threshold must be > 0".to_string(),
            ));
        }
        if cb.success_threshold == 0 {
            return Err(ResilienceError::Config(
                "Circuit breaker success_threshold must be > 0".to_string(),
            ));
        }
        if cb.open_timeout_ms == 0 {
            return Err(ResilienceError::Config(
                "Circuit breaker open_timeout_ms must be > 0".to_string(),
            ));
        }
        if cb.half_open_max_requests == 0 {
            return Err(ResilienceError::Config(
                "Circuit breaker half_open_max_requests must be > 0".to_string(),
            ));
        }

        if let Some(jitter) = self.retry.jitter() {
            if !(0.0..=1.0).contains(&jitter) {
                return Err(ResilienceError::Config(format!(
                    "Retry jitter must be within [0, 1], got {}",
                    jitter
                )));
            }
        }
        if let Some(multiplier) = self.retry.multiplier() {
            if multiplier < 1.0 {
                return Err(ResilienceError::Config(format!(
                    "Retry multiplier must be >= 1, got {}",
                    multiplier
                )));
            }
        }

        if let Some(hedging) = &self.hedging {
            if hedging.max_parallel_attempts == 0 {
                return Err(ResilienceError::Config(
                    "Hedging max_parallel_attempts must be >= 1".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::retry::{RetryBudget, RetryStrategy};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
circuit_breaker:
  failure_threshold: 3
  success_threshold: 1
  open_timeout_ms: 5000
  half_open_max_requests: 1

retry:
  type: exponential
  initial_interval_ms: 10
  max_interval_ms: 100
  multiplier: 2.0
  jitter: 0.0
  budget:
    max_attempts: 4
    max_duration_ms: 2000
    allowed_error_kinds: [network, timeout]

hedging:
  max_parallel_attempts: 3
  inter_attempt_delay_ms: 20
"#;

        let config = ResilienceConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.open_timeout(), Duration::from_secs(5));
        assert!(config.circuit_breaker_enabled);

        let budget = config.retry.budget();
        assert_eq!(budget.max_attempts, 4);
        assert_eq!(budget.max_duration_limit(), Some(Duration::from_secs(2)));
        assert!(budget.allowed_error_kinds.contains(&ErrorKind::Timeout));
        assert_eq!(config.retry.next_interval(3), Duration::from_millis(40));

        let hedging = config.hedging.unwrap();
        assert_eq!(hedging.max_parallel_attempts, 3);
        assert_eq!(hedging.inter_attempt_delay(), Duration::from_millis(20));
    }

    #[test]
    fn test_default_values() {
        let config = ResilienceConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ResilienceConfig::default());
        assert!(config.validate().is_ok());
        assert!(config.hedging.is_none());
    }

    #[test]
    fn test_validate_zero_threshold() {
        let mut config = ResilienceConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_success_threshold_may_exceed_half_open_cap() {
        // the cap bounds concurrent trial calls, not calls per half-open period
        let mut config = ResilienceConfig::default();
        config.circuit_breaker.success_threshold = 5;
        config.circuit_breaker.half_open_max_requests = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_jitter_and_multiplier() {
        let mut config = ResilienceConfig::default();
        config.retry = RetryStrategy::linear(Duration::from_millis(10), 1.5, RetryBudget::default());
        assert!(config.validate().is_err());

        config.retry = RetryStrategy::exponential(
            Duration::from_millis(10),
            Duration::from_millis(100),
            0.5,
            0.1,
            RetryBudget::default(),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_hedging() {
        let mut config = ResilienceConfig::default();
        config.hedging = Some(HedgedRequestConfig::new(0, Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = ResilienceConfig::from_yaml("retry: { type: fibonacci }").unwrap_err();
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retry:\n  type: no_retry\ncircuit_breaker_enabled: false").unwrap();

        let config = ResilienceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.retry, RetryStrategy::NoRetry);
        assert!(!config.circuit_breaker_enabled);

        assert!(ResilienceConfig::from_file("/nonexistent/resilience.yaml").is_err());
    }
}
