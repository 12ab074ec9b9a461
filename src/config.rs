//! Configuration management for tollgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// What the consumption API should answer when the counter store
/// cannot be reached.
///
/// The default is `FailClosed`: an unreachable counter cannot be
/// trusted to have recorded anything, so requests are denied until
/// the store recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deny requests while the store is unavailable
    #[default]
    FailClosed,

    /// Allow requests uncounted while the store is unavailable
    FailOpen,
}

/// Configuration for a fixed-window rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum points a subject may consume per window
    #[serde(default = "default_points")]
    pub points: u64,

    /// Window duration in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// Namespace prefix for counter keys, so limiters can share a store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Outcome when the store is unavailable
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Upper bound on a single store operation in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            points: default_points(),
            duration_secs: default_duration_secs(),
            key_prefix: default_key_prefix(),
            failure_policy: FailurePolicy::default(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_points() -> u64 {
    10
}

fn default_duration_secs() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "tollgate".to_string()
}

fn default_store_timeout_ms() -> u64 {
    1000
}

impl LimiterConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: LimiterConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TollgateError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.points == 0 {
            return Err(TollgateError::InvalidConfiguration(
                "points must be at least 1".to_string(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(TollgateError::InvalidConfiguration(
                "duration_secs must be at least 1".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(TollgateError::InvalidConfiguration(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(TollgateError::InvalidConfiguration(
                "store_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Window duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Store operation timeout.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
