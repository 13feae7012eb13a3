//! Drain-time handlers, keyed by message type.
//!
//! The table is closed: it is built once when the bus is created. Messages
//! whose type has no entry are logged and dropped by the drain.

use crate::bus::CommunicationBus;
use convoy_core::{kinds, BusMessage};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A handler invoked for each drained message of its type.
pub type DrainHandler = fn(&CommunicationBus, &BusMessage);

pub(crate) fn default_handlers() -> HashMap<&'static str, DrainHandler> {
    let mut table: HashMap<&'static str, DrainHandler> = HashMap::new();
    table.insert(kinds::PERFORMANCE_ALERT, handle_performance_alert);
    table.insert(kinds::ERROR_REPORT, handle_error_report);
    table.insert(kinds::AGENT_STATUS, handle_agent_status);
    table.insert(kinds::WORKFLOW_UPDATE, handle_workflow_update);
    table.insert(kinds::TASK_COMPLETION, handle_task_completion);
    table.insert(kinds::RESOURCE_REQUEST, handle_coordination);
    table.insert(kinds::COORDINATION_REQUEST, handle_coordination);
    table
}

fn handle_performance_alert(bus: &CommunicationBus, msg: &BusMessage) {
    warn!(from = %msg.from, priority = %msg.priority, "Performance alert");
    bus.broadcast(msg, "urgent");
}

fn handle_error_report(bus: &CommunicationBus, msg: &BusMessage) {
    warn!(from = %msg.from, content = %msg.content, "Error report");
    bus.broadcast(msg, "urgent");
    bus.broadcast(msg, "debug");
}

fn handle_agent_status(bus: &CommunicationBus, msg: &BusMessage) {
    let Some(status) = msg.content.get("status").and_then(|s| s.as_str()) else {
        debug!(from = %msg.from, "agent_status without status field");
        return;
    };
    match msg.from.parse() {
        Ok(agent) => bus.record_reported_status(agent, status),
        Err(_) => debug!(from = %msg.from, status, "agent_status from non-agent sender"),
    }
}

fn handle_workflow_update(_bus: &CommunicationBus, msg: &BusMessage) {
    debug!(
        event = msg.content.get("event").and_then(|e| e.as_str()).unwrap_or("unknown"),
        "Workflow update drained"
    );
}

fn handle_task_completion(_bus: &CommunicationBus, msg: &BusMessage) {
    info!(from = %msg.from, "Task completion reported");
}

fn handle_coordination(_bus: &CommunicationBus, msg: &BusMessage) {
    info!(from = %msg.from, kind = %msg.kind, "Coordination message drained");
}
