use crate::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known message type tags. Anything else is routed to `system`.
pub mod kinds {
    /// Progress of a workflow run or phase.
    pub const WORKFLOW_UPDATE: &str = "workflow_update";
    /// Agent heartbeat / status report.
    pub const AGENT_STATUS: &str = "agent_status";
    /// Degraded performance notice.
    pub const PERFORMANCE_ALERT: &str = "performance_alert";
    /// Failure report from an agent or the orchestrator.
    pub const ERROR_REPORT: &str = "error_report";
    /// A job or phase finished.
    pub const TASK_COMPLETION: &str = "task_completion";
    /// Request for shared resources.
    pub const RESOURCE_REQUEST: &str = "resource_request";
    /// Request for multi-agent coordination.
    pub const COORDINATION_REQUEST: &str = "coordination_request";
    /// Sent by the bus to a freshly connected agent.
    pub const WELCOME: &str = "welcome";
}

/// Delivery tier of a bus message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Drained on the normal (slower) tick.
    #[default]
    Normal,
    /// Drained on the priority tick.
    High,
    /// Drained on the priority tick.
    Critical,
}

impl Priority {
    /// Whether the message belongs on the priority queue.
    pub fn is_urgent(self) -> bool {
        matches!(self, Priority::High | Priority::Critical)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// A structured record travelling over the communication bus.
///
/// Inbound frames may omit `id`, `from`, `priority` and `timestamp`; the bus
/// fills them in on ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique identifier for this message.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Type tag driving routing and drain handlers.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender id (an agent id, or a component name such as `orchestrator`).
    #[serde(default)]
    pub from: String,
    /// Explicit recipient. When absent the message fans out to a channel.
    #[serde(default)]
    pub to: Option<AgentId>,
    /// Destination channel name, filled in by routing when absent.
    #[serde(default)]
    pub channel: Option<String>,
    /// Opaque payload.
    #[serde(default)]
    pub content: serde_json::Value,
    /// Delivery tier.
    #[serde(default)]
    pub priority: Priority,
    /// UTC creation time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    /// Creates a normal-priority message from `from` with the given type and payload.
    pub fn new(kind: impl Into<String>, from: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            from: from.into(),
            to: None,
            channel: None,
            content,
            priority: Priority::Normal,
            timestamp: Utc::now(),
        }
    }

    /// Sets the delivery tier.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the destination channel.
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Addresses the message to a single agent.
    pub fn to_agent(mut self, agent: AgentId) -> Self {
        self.to = Some(agent);
        self
    }

    /// Serializes to a wire frame. Falls back to an empty object on failure.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_inbound_frame_gets_defaults() {
        let msg: BusMessage = serde_json::from_str(r#"{"type":"agent_status"}"#).unwrap();
        assert_eq!(msg.kind, "agent_status");
        assert_eq!(msg.priority, Priority::Normal);
        assert!(msg.to.is_none());
        assert!(msg.channel.is_none());
        assert!(msg.content.is_null());
    }

    #[test]
    fn test_priority_tiers() {
        assert!(!Priority::Normal.is_urgent());
        assert!(Priority::High.is_urgent());
        assert!(Priority::Critical.is_urgent());
        let p: Priority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(p, Priority::Critical);
    }

    #[test]
    fn test_frame_uses_type_tag() {
        let msg = BusMessage::new(kinds::ERROR_REPORT, "orchestrator", serde_json::json!({"x": 1}))
            .with_priority(Priority::High);
        let frame: serde_json::Value = serde_json::from_str(&msg.to_frame()).unwrap();
        assert_eq!(frame["type"], "error_report");
        assert_eq!(frame["priority"], "high");
        assert_eq!(frame["from"], "orchestrator");
    }
}
