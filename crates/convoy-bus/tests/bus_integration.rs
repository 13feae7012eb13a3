//! End-to-end bus behaviour: fan-out without self-delivery, bounded buffers,
//! and broadcast counts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use convoy_bus::*;
use convoy_core::{kinds, AgentId, BusMessage, Priority};
use serde_json::json;
use tokio::sync::mpsc;

fn connect(bus: &CommunicationBus) -> (AgentId, mpsc::UnboundedReceiver<String>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = bus.connect(tx);
    let welcome: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(welcome["type"], "welcome");
    (id, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}

// ---------------------------------------------------------------------------
// Two agents on `system`: the sender never receives its own message
// ---------------------------------------------------------------------------

#[test]
fn status_message_reaches_peer_only() {
    let bus = CommunicationBus::new(BusConfig::default());
    bus.create_channel(ChannelConfig::new("system", ChannelKind::Broadcast))
        .unwrap();
    bus.create_channel(ChannelConfig::new("urgent", ChannelKind::Priority))
        .unwrap();

    let (agent1, mut rx1) = connect(&bus);
    let (agent2, mut rx2) = connect(&bus);
    bus.join_channel(agent1, "system").unwrap();
    bus.join_channel(agent2, "system").unwrap();

    let msg = BusMessage::new(kinds::AGENT_STATUS, "", json!({"status": "idle"}))
        .with_priority(Priority::Normal);
    let delivered = bus.ingest(agent1, msg).unwrap();
    assert_eq!(delivered, 1);

    let received = drain(&mut rx2);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["channel"], "system");
    assert_eq!(received[0]["from"], agent1.to_string());
    assert!(drain(&mut rx1).is_empty());

    assert_eq!(bus.stats().normal_queue_len, 1);
    assert_eq!(bus.stats().priority_queue_len, 0);
}

// ---------------------------------------------------------------------------
// Channel buffer keeps exactly the newest `capacity` messages
// ---------------------------------------------------------------------------

#[test]
fn channel_buffer_evicts_oldest_beyond_capacity() {
    let bus = CommunicationBus::new(BusConfig::default());
    bus.create_channel(ChannelConfig::new("system", ChannelKind::Broadcast).with_capacity(100))
        .unwrap();
    let (sender, _rx) = connect(&bus);

    for i in 0..105 {
        let msg = BusMessage::new(kinds::AGENT_STATUS, "", json!({ "seq": i }));
        bus.route(sender, &msg, "system").unwrap();
    }

    let buffered = bus.channel_messages("system").unwrap();
    assert_eq!(buffered.len(), 100);
    assert_eq!(buffered.first().unwrap().content["seq"], 5);
    assert_eq!(buffered.last().unwrap().content["seq"], 104);
}

#[test]
fn global_history_is_capped() {
    let bus = CommunicationBus::with_default_channels(BusConfig {
        history_capacity: 10,
        ..BusConfig::default()
    });
    for i in 0..25 {
        bus.publish(BusMessage::new(kinds::WORKFLOW_UPDATE, "orchestrator", json!({ "seq": i })));
    }
    let history = bus.history();
    assert_eq!(history.len(), 10);
    assert_eq!(history[0].content["seq"], 15);
}

// ---------------------------------------------------------------------------
// Broadcast delivers to exactly the connected members
// ---------------------------------------------------------------------------

#[test]
fn broadcast_counts_connected_members() {
    let bus = CommunicationBus::with_default_channels(BusConfig::default());
    let mut receivers = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..4 {
        let (id, rx) = connect(&bus);
        bus.join_channel(id, "workflow").unwrap();
        ids.push(id);
        receivers.push(rx);
    }

    let msg = BusMessage::new(kinds::WORKFLOW_UPDATE, "orchestrator", json!({}));
    assert_eq!(bus.broadcast(&msg, "workflow"), 4);

    // A member-sender is skipped.
    let from_member = BusMessage::new(kinds::WORKFLOW_UPDATE, ids[0].to_string(), json!({}));
    assert_eq!(bus.broadcast(&from_member, "workflow"), 3);

    // Disconnected agents are pruned and no longer counted.
    bus.disconnect(ids[3]).unwrap();
    assert_eq!(bus.broadcast(&msg, "workflow"), 3);

    assert_eq!(bus.broadcast(&msg, "missing"), 0);
}

#[test]
fn routing_to_missing_channel_degrades_gracefully() {
    // No channels at all: ingest still succeeds and records history.
    let bus = CommunicationBus::new(BusConfig::default());
    let (agent, _rx) = connect(&bus);
    let delivered = bus
        .ingest(agent, BusMessage::new(kinds::TASK_COMPLETION, "", json!({})))
        .unwrap();
    assert_eq!(delivered, 0);
    assert_eq!(bus.history().len(), 1);
    assert_eq!(bus.stats().normal_queue_len, 0);
}

#[test]
fn unknown_type_honours_explicit_channel() {
    let bus = CommunicationBus::with_default_channels(BusConfig::default());
    let (a, _ra) = connect(&bus);
    let (b, mut rb) = connect(&bus);
    bus.join_channel(b, "debug").unwrap();

    let msg = BusMessage::new("trace_dump", "", json!({})).on_channel("debug");
    assert_eq!(bus.ingest(a, msg).unwrap(), 1);
    assert_eq!(drain(&mut rb)[0]["channel"], "debug");
}
