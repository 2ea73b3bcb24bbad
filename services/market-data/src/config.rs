//! Service configuration
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Replay scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Fixed sleep between replayed messages for tasks with `execute_delay`.
    pub pacing_interval_ms: u64,
    /// Upper bound for joining one playback worker on `stop()`.
    pub join_timeout_ms: u64,
    /// Chain every task after the previous one by track number.
    pub chain_tasks: bool,
    /// Report wall-clock minus source-clock offset when a track starts.
    pub emit_latency_offset: bool,
}

impl ReplayConfig {
    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            pacing_interval_ms: 4,
            join_timeout_ms: 5_000,
            chain_tasks: true,
            emit_latency_offset: true,
        }
    }
}

/// Inbound dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Log message ids that go backwards on a feed.
    pub check_message_order: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            check_message_order: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    pub replay: ReplayConfig,
    pub dispatcher: DispatcherConfig,
}

impl MarketDataConfig {
    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: MarketDataConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.replay.join_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "replay.join_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
