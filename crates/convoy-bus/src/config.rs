use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the communication bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Interval between priority-queue drains.
    #[serde(default = "default_priority_tick_ms")]
    pub priority_tick_ms: u64,
    /// Interval between normal-queue drains.
    #[serde(default = "default_normal_tick_ms")]
    pub normal_tick_ms: u64,
    /// Interval between retention sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Messages older than this are evicted by the sweep.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Hard cap on the global message history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Buffer capacity for channels that do not set their own.
    #[serde(default = "default_channel_buffer_capacity")]
    pub channel_buffer_capacity: usize,
}

fn default_priority_tick_ms() -> u64 {
    100
}
fn default_normal_tick_ms() -> u64 {
    1_000
}
fn default_cleanup_interval_secs() -> u64 {
    86_400
}
fn default_retention_secs() -> u64 {
    86_400
}
fn default_history_capacity() -> usize {
    1_000
}
fn default_channel_buffer_capacity() -> usize {
    100
}

impl BusConfig {
    /// Priority drain interval, at least 1ms.
    pub fn priority_tick(&self) -> Duration {
        Duration::from_millis(self.priority_tick_ms.max(1))
    }

    /// Normal drain interval, at least 1ms.
    pub fn normal_tick(&self) -> Duration {
        Duration::from_millis(self.normal_tick_ms.max(1))
    }

    /// Retention sweep interval, at least 1s.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// How long history and disconnected records are kept.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX))
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            priority_tick_ms: default_priority_tick_ms(),
            normal_tick_ms: default_normal_tick_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            retention_secs: default_retention_secs(),
            history_capacity: default_history_capacity(),
            channel_buffer_capacity: default_channel_buffer_capacity(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BusConfig = toml::from_str("priority_tick_ms = 50").unwrap();
        assert_eq!(config.priority_tick(), Duration::from_millis(50));
        assert_eq!(config.normal_tick(), Duration::from_secs(1));
        assert_eq!(config.history_capacity, 1_000);
    }

    #[test]
    fn test_priority_tick_is_shorter_by_default() {
        let config = BusConfig::default();
        assert!(config.priority_tick() < config.normal_tick());
    }
}
