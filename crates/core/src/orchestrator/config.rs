//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a submission is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Persist the request, spawn the drive task and return immediately.
    #[default]
    Background,
    /// Drive every step before returning the terminal snapshot.
    Inline,
}

/// Configuration for the provisioning orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Whether submissions return at once or after driving.
    #[serde(default)]
    pub execution: ExecutionMode,

    /// Maximum requests driven at the same time.
    /// Further requests wait for a free slot.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Resume non-terminal requests when the orchestrator starts.
    #[serde(default = "default_true")]
    pub resume_on_start: bool,

    /// How many generated identifiers to try before giving up on a collision.
    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,

    /// Retry policy for transient infrastructure failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_max_id_attempts() -> u32 {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::default(),
            max_concurrent_requests: default_max_concurrent(),
            resume_on_start: true,
            max_id_attempts: default_max_id_attempts(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per step, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after `failed_attempts` consecutive failures.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(63) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.execution, ExecutionMode::Background);
        assert_eq!(config.max_concurrent_requests, 8);
        assert!(config.resume_on_start);
        assert_eq!(config.max_id_attempts, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            execution = "inline"
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.execution, ExecutionMode::Inline);
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for(2), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(6), Duration::from_millis(10_000));
        assert_eq!(retry.delay_for(60), Duration::from_millis(10_000));
    }

    #[test]
    fn test_constant_backoff() {
        let retry = RetryConfig {
            backoff_multiplier: 1.0,
            initial_delay_ms: 250,
            ..Default::default()
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(250));
        assert_eq!(retry.delay_for(4), Duration::from_millis(250));
    }
}
