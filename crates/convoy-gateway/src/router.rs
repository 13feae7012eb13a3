use convoy_core::{AgentId, BusMessage, ConvoyError, ConvoyResult};
use convoy_orchestrator::{AgentRole, WorkflowOrchestrator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Non-message frames an agent may send over its socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Join a channel.
    Join {
        /// Channel name.
        channel: String,
    },
    /// Leave a channel.
    Leave {
        /// Channel name.
        channel: String,
    },
    /// Enrol this connection in the agent registry under its bus id.
    Register {
        /// Role the agent works as.
        role: AgentRole,
        /// Free-form capability tags.
        #[serde(default)]
        capabilities: Vec<String>,
    },
}

/// Turns socket text frames into bus and registry calls.
pub struct FrameRouter {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl FrameRouter {
    /// Router over `orchestrator`'s bus and registry.
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Handle one frame. Failures are logged and answered with an `error`
    /// event; the socket stays open.
    pub fn handle_text(&self, agent: AgentId, text: &str) {
        if let Err(e) = self.handle_frame(agent, text) {
            warn!(agent_id = %agent, kind = e.kind(), error = %e, "Rejected inbound frame");
            self.reply(agent, "error", serde_json::json!({ "kind": e.kind(), "error": e.to_string() }));
        }
    }

    /// Returns how many recipients a routed message reached (0 for control
    /// frames).
    pub fn handle_frame(&self, agent: AgentId, text: &str) -> ConvoyResult<usize> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ConvoyError::MessageParse(e.to_string()))?;

        if value.get("action").is_some() {
            let control: ControlFrame = serde_json::from_value(value)
                .map_err(|e| ConvoyError::MessageParse(e.to_string()))?;
            self.apply(agent, &control)?;
            self.reply(agent, "ack", serde_json::to_value(&control)?);
            return Ok(0);
        }

        let message: BusMessage = serde_json::from_value(value)
            .map_err(|e| ConvoyError::MessageParse(e.to_string()))?;
        debug!(agent_id = %agent, kind = %message.kind, "Inbound message");
        self.orchestrator.bus().ingest(agent, message)
    }

    fn apply(&self, agent: AgentId, control: &ControlFrame) -> ConvoyResult<()> {
        let bus = self.orchestrator.bus();
        match control {
            ControlFrame::Join { channel } => bus.join_channel(agent, channel),
            ControlFrame::Leave { channel } => bus.leave_channel(agent, channel),
            ControlFrame::Register { role, capabilities } => {
                let registry = self.orchestrator.registry();
                if registry.get(agent).is_some() {
                    registry.set_online(agent)
                } else {
                    registry.register_with_id(agent, *role, capabilities.clone())
                }
            }
        }
    }

    fn reply(&self, agent: AgentId, kind: &str, content: serde_json::Value) {
        let message = BusMessage::new(kind, "gateway", content).to_agent(agent);
        self.orchestrator.bus().send(agent, &message);
    }

    /// Drop the agent's bus connection and take it out of selection.
    pub fn disconnect(&self, agent: AgentId) {
        if let Err(e) = self.orchestrator.bus().disconnect(agent) {
            debug!(agent_id = %agent, error = %e, "Disconnect of unknown connection");
        }
        if self.orchestrator.registry().get(agent).is_some() {
            if let Err(e) = self.orchestrator.registry().set_offline(agent) {
                debug!(agent_id = %agent, error = %e, "Could not mark agent offline");
            }
        }
        info!(agent_id = %agent, "Agent socket closed");
    }
}
