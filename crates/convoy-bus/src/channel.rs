use crate::buffer::BoundedBuffer;
use convoy_core::{AgentId, BusMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What a channel is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Fleet-wide announcements.
    Broadcast,
    /// Workflow progress.
    Workflow,
    /// Per-agent reporting.
    Agent,
    /// Escalations.
    Priority,
    /// Diagnostics.
    Debug,
}

/// Channel configuration as accepted by `create_channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Unique channel name.
    pub name: String,
    /// What the channel carries.
    pub kind: ChannelKind,
    /// Human-readable summary.
    #[serde(default)]
    pub description: String,
    /// Higher is more important. Informational.
    #[serde(default)]
    pub priority: u8,
    /// Buffer capacity override; the bus default applies when absent.
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl ChannelConfig {
    /// Config with priority 0 and the bus default capacity.
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            priority: 0,
            capacity: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the informational priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Override the buffer capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// The channels every bus created with defaults starts with.
pub fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new("system", ChannelKind::Broadcast)
            .with_description("Fleet-wide status and unrouted messages")
            .with_priority(5),
        ChannelConfig::new("workflow", ChannelKind::Workflow)
            .with_description("Workflow run and phase progress")
            .with_priority(6),
        ChannelConfig::new("coordination", ChannelKind::Workflow)
            .with_description("Resource and coordination requests between agents")
            .with_priority(6),
        ChannelConfig::new("monitoring", ChannelKind::Broadcast)
            .with_description("Performance alerts and metrics")
            .with_priority(4),
        ChannelConfig::new("urgent", ChannelKind::Priority)
            .with_description("Escalated alerts and error reports")
            .with_priority(10),
        ChannelConfig::new("debug", ChannelKind::Debug)
            .with_description("Error reports and diagnostics")
            .with_priority(1),
    ]
}

/// Name of the per-agent reporting channel.
pub fn agent_channel_name(agent: AgentId) -> String {
    format!("agent:{agent}")
}

/// A named pub/sub topic with explicit membership and bounded retention.
#[derive(Debug)]
pub(crate) struct Channel {
    pub(crate) config: ChannelConfig,
    pub(crate) members: HashSet<AgentId>,
    pub(crate) buffer: BoundedBuffer<BusMessage>,
}

impl Channel {
    pub(crate) fn new(config: ChannelConfig, default_capacity: usize) -> Self {
        let capacity = config.capacity.unwrap_or(default_capacity);
        Self {
            config,
            members: HashSet::new(),
            buffer: BoundedBuffer::new(capacity),
        }
    }

    /// Snapshot for external views.
    pub(crate) fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: self.config.name.clone(),
            kind: self.config.kind,
            description: self.config.description.clone(),
            priority: self.config.priority,
            member_count: self.members.len(),
            buffered: self.buffer.len(),
            capacity: self.buffer.capacity(),
        }
    }
}

/// Serializable channel summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// What the channel carries.
    pub kind: ChannelKind,
    /// Human-readable summary.
    pub description: String,
    /// Informational priority.
    pub priority: u8,
    /// Agents currently joined.
    pub member_count: usize,
    /// Messages currently buffered.
    pub buffered: usize,
    /// Buffer capacity.
    pub capacity: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channels_cover_routing_targets() {
        let names: Vec<String> = default_channels().into_iter().map(|c| c.name).collect();
        for target in ["system", "workflow", "coordination", "monitoring", "urgent", "debug"] {
            assert!(names.iter().any(|n| n == target), "missing {target}");
        }
    }

    #[test]
    fn test_capacity_override() {
        let channel = Channel::new(
            ChannelConfig::new("small", ChannelKind::Debug).with_capacity(5),
            100,
        );
        assert_eq!(channel.buffer.capacity(), 5);
        let channel = Channel::new(ChannelConfig::new("big", ChannelKind::Debug), 100);
        assert_eq!(channel.info().capacity, 100);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ChannelConfig =
            serde_json::from_str(r#"{"name": "ops", "kind": "priority"}"#).unwrap();
        assert_eq!(config.kind, ChannelKind::Priority);
        assert_eq!(config.priority, 0);
        assert!(config.capacity.is_none());
    }
}
