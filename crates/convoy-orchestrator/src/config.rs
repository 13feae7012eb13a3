use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Default per-phase timeout. `None` lets handlers run unbounded.
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: Option<u64>,
    /// Finished runs kept in history.
    #[serde(default = "default_run_history_capacity")]
    pub history_capacity: usize,
}

fn default_phase_timeout_secs() -> Option<u64> {
    Some(300)
}
fn default_run_history_capacity() -> usize {
    500
}

impl OrchestratorConfig {
    /// `None` disables the timeout.
    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            phase_timeout_secs: default_phase_timeout_secs(),
            history_capacity: default_run_history_capacity(),
        }
    }
}

/// Sampling cadences for the performance monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Agent fleet sampling cadence.
    #[serde(default = "default_agent_interval_secs")]
    pub agent_interval_secs: u64,
    /// Workflow stats sampling cadence.
    #[serde(default = "default_workflow_interval_secs")]
    pub workflow_interval_secs: u64,
    /// Bus health sampling cadence.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Samples retained per category.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Agents below this success rate (after a few jobs) raise an alert.
    #[serde(default = "default_alert_success_rate")]
    pub alert_success_rate: f64,
}

fn default_agent_interval_secs() -> u64 {
    30
}
fn default_workflow_interval_secs() -> u64 {
    60
}
fn default_health_interval_secs() -> u64 {
    15
}
fn default_max_samples() -> usize {
    100
}
fn default_alert_success_rate() -> f64 {
    0.5
}

impl MonitorConfig {
    /// Agent cadence as a duration.
    pub fn agent_interval(&self) -> Duration {
        Duration::from_secs(self.agent_interval_secs.max(1))
    }

    /// Workflow cadence as a duration.
    pub fn workflow_interval(&self) -> Duration {
        Duration::from_secs(self.workflow_interval_secs.max(1))
    }

    /// Health cadence as a duration.
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            agent_interval_secs: default_agent_interval_secs(),
            workflow_interval_secs: default_workflow_interval_secs(),
            health_interval_secs: default_health_interval_secs(),
            max_samples: default_max_samples(),
            alert_success_rate: default_alert_success_rate(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_defaults() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.phase_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.history_capacity, 500);
    }

    #[test]
    fn test_monitor_partial_toml() {
        let config: MonitorConfig = toml::from_str("health_interval_secs = 5").unwrap();
        assert_eq!(config.health_interval(), Duration::from_secs(5));
        assert_eq!(config.agent_interval(), Duration::from_secs(30));
        assert_eq!(config.max_samples, 100);
    }
}
