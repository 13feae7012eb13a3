#![allow(clippy::unwrap_used, clippy::expect_used)]

use convoy_core::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. Inbound wire frames decode with defaults and keep explicit fields
// ---------------------------------------------------------------------------

#[test]
fn inbound_frame_with_all_fields() {
    let recipient = Uuid::new_v4();
    let frame = serde_json::json!({
        "type": "coordination_request",
        "from": "spoofed",
        "to": recipient,
        "channel": "coordination",
        "content": {"need": "review"},
        "priority": "high",
    });

    let msg: BusMessage = serde_json::from_value(frame).unwrap();
    assert_eq!(msg.kind, kinds::COORDINATION_REQUEST);
    assert_eq!(msg.to, Some(recipient));
    assert_eq!(msg.channel.as_deref(), Some("coordination"));
    assert_eq!(msg.content["need"], "review");
    assert_eq!(msg.priority, Priority::High);
}

#[test]
fn inbound_frame_without_type_is_rejected() {
    let bad: Result<BusMessage, _> = serde_json::from_str(r#"{"content": 1}"#);
    assert!(bad.is_err());
}

#[test]
fn unknown_priority_is_rejected() {
    let bad: Result<BusMessage, _> =
        serde_json::from_str(r#"{"type": "agent_status", "priority": "urgent"}"#);
    assert!(bad.is_err());
}

// ---------------------------------------------------------------------------
// 2. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let err = ConvoyError::UnknownWorkflowType("nope".to_string());
    assert_eq!(err.to_string(), "Unknown workflow type: nope");

    let err = ConvoyError::DependencyNotMet {
        phase: "B".into(),
        dependency: "A".into(),
    };
    assert_eq!(err.to_string(), "Dependency not met for phase B: A");

    let err = ConvoyError::AgentUnavailable("tester".into());
    assert_eq!(err.to_string(), "No available agent for role: tester");

    let err = ConvoyError::UnknownChannel("ghost".into());
    assert_eq!(err.to_string(), "Unknown channel: ghost");

    let bad_json = serde_json::from_str::<serde_json::Value>("not json");
    let convoy_err: ConvoyError = bad_json.unwrap_err().into();
    assert!(convoy_err.to_string().starts_with("JSON error:"));
    assert_eq!(convoy_err.kind(), "json");

    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let convoy_err: ConvoyError = io_err.into();
    assert!(convoy_err.to_string().starts_with("IO error:"));
}

// ---------------------------------------------------------------------------
// 3. Builders
// ---------------------------------------------------------------------------

#[test]
fn message_builders_set_routing_fields() {
    let agent = Uuid::new_v4();
    let msg = BusMessage::new(kinds::TASK_COMPLETION, "orchestrator", serde_json::json!({}))
        .on_channel("workflow")
        .to_agent(agent)
        .with_priority(Priority::Critical);

    assert_eq!(msg.channel.as_deref(), Some("workflow"));
    assert_eq!(msg.to, Some(agent));
    assert!(msg.priority.is_urgent());
    assert_eq!(msg.priority.to_string(), "critical");

    let other = BusMessage::new(kinds::TASK_COMPLETION, "orchestrator", serde_json::json!({}));
    assert_ne!(msg.id, other.id);
}

// ---------------------------------------------------------------------------
// 4. Shutdown is shared across clones
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_clone_triggers_all_listeners() {
    let shutdown = Shutdown::new();
    let clone = shutdown.clone();
    let mut a = shutdown.listener();
    let mut b = clone.listener();

    clone.trigger();
    a.wait().await;
    b.wait().await;
    assert!(shutdown.is_triggered());
}
