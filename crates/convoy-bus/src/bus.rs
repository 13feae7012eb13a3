use crate::buffer::BoundedBuffer;
use crate::channel::{default_channels, Channel, ChannelConfig, ChannelInfo};
use crate::config::BusConfig;
use crate::connection::{AgentConnection, ConnectionInfo, Transport};
use crate::handlers::{default_handlers, DrainHandler};
use crate::routing;
use chrono::{DateTime, Utc};
use convoy_core::{kinds, AgentId, BusMessage, ConvoyError, ConvoyResult, Shutdown};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct Counters {
    ingested: AtomicU64,
    delivered: AtomicU64,
    failed_sends: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time bus statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Connections currently open.
    pub connected_agents: usize,
    /// Open plus retained disconnected connections.
    pub known_connections: usize,
    /// Registered channels.
    pub channels: usize,
    /// Messages in the global history.
    pub history_len: usize,
    /// Messages waiting for the next priority drain.
    pub priority_queue_len: usize,
    /// Messages waiting for the next normal drain.
    pub normal_queue_len: usize,
    /// Messages accepted by `ingest` or `publish`.
    pub ingested: u64,
    /// Frames handed to a transport.
    pub delivered: u64,
    /// Sends to unknown, closed or disconnected agents.
    pub failed_sends: u64,
    /// Drained messages that had a handler.
    pub processed: u64,
    /// Drained messages with no handler.
    pub dropped: u64,
}

/// Real-time pub/sub bus between agents.
///
/// Each store (connections, channels, history, each queue) has its own lock.
/// When both the connection and channel stores are needed they are always
/// locked in that order.
pub struct CommunicationBus {
    config: BusConfig,
    connections: RwLock<HashMap<AgentId, AgentConnection>>,
    channels: RwLock<HashMap<String, Channel>>,
    history: Mutex<BoundedBuffer<BusMessage>>,
    priority_queue: Mutex<VecDeque<BusMessage>>,
    normal_queue: Mutex<VecDeque<BusMessage>>,
    handlers: HashMap<&'static str, DrainHandler>,
    counters: Counters,
    pub(crate) shutdown: Shutdown,
    pub(crate) pump: Mutex<Option<JoinHandle<()>>>,
}

impl CommunicationBus {
    /// An empty bus with no channels.
    pub fn new(config: BusConfig) -> Self {
        Self {
            history: Mutex::new(BoundedBuffer::new(config.history_capacity)),
            config,
            connections: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            priority_queue: Mutex::new(VecDeque::new()),
            normal_queue: Mutex::new(VecDeque::new()),
            handlers: default_handlers(),
            counters: Counters::default(),
            shutdown: Shutdown::new(),
            pump: Mutex::new(None),
        }
    }

    /// A bus pre-populated with the standard channel set.
    pub fn with_default_channels(config: BusConfig) -> Self {
        let bus = Self::new(config);
        for channel in default_channels() {
            if let Err(e) = bus.create_channel(channel) {
                warn!(error = %e, "Failed to create default channel");
            }
        }
        bus
    }

    /// Configuration the bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // --- Connections ---

    /// Register a new connection and send it a welcome event listing the channels.
    pub fn connect(&self, transport: Transport) -> AgentId {
        let id = Uuid::new_v4();
        let channel_names = self.channel_names();
        let conn = self.welcome(id, transport, channel_names);
        self.connections.write().insert(id, conn);
        info!(agent_id = %id, "Agent connected");
        id
    }

    /// Connect under a known id (e.g. a registry agent id). Reconnecting a
    /// disconnected id replaces its record; an active id is rejected.
    pub fn connect_as(&self, id: AgentId, transport: Transport) -> ConvoyResult<()> {
        let channel_names = self.channel_names();
        let mut conns = self.connections.write();
        if conns.get(&id).is_some_and(AgentConnection::is_connected) {
            return Err(ConvoyError::Connection(format!(
                "agent {id} is already connected"
            )));
        }
        let conn = self.welcome(id, transport, channel_names);
        conns.insert(id, conn);
        info!(agent_id = %id, "Agent connected");
        Ok(())
    }

    fn welcome(&self, id: AgentId, transport: Transport, channels: Vec<String>) -> AgentConnection {
        let conn = AgentConnection::new(id, transport);
        let welcome = BusMessage::new(
            kinds::WELCOME,
            "bus",
            serde_json::json!({ "agentId": id, "channels": channels }),
        )
        .to_agent(id);
        if let Err(e) = conn.deliver(&welcome.to_frame()) {
            warn!(agent_id = %id, error = %e, "Failed to send welcome");
        }
        conn
    }

    /// Mark the connection disconnected and prune it from every channel.
    pub fn disconnect(&self, agent: AgentId) -> ConvoyResult<()> {
        let mut conns = self.connections.write();
        let conn = conns
            .get_mut(&agent)
            .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
        if !conn.is_connected() {
            return Ok(());
        }
        let memberships = conn.close();
        let mut channels = self.channels.write();
        for name in &memberships {
            if let Some(channel) = channels.get_mut(name) {
                channel.members.remove(&agent);
            }
        }
        info!(agent_id = %agent, channels = memberships.len(), "Agent disconnected");
        Ok(())
    }

    /// Close every live connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let mut conns = self.connections.write();
        let mut channels = self.channels.write();
        let mut closed = 0;
        for conn in conns.values_mut().filter(|c| c.is_connected()) {
            for name in conn.close() {
                if let Some(channel) = channels.get_mut(&name) {
                    channel.members.remove(&conn.id);
                }
            }
            closed += 1;
        }
        if closed > 0 {
            info!(closed, "Closed all agent connections");
        }
        closed
    }

    pub(crate) fn record_reported_status(&self, agent: AgentId, status: &str) {
        if let Some(conn) = self.connections.write().get_mut(&agent) {
            conn.reported_status = Some(status.to_string());
            conn.touch();
        }
    }

    // --- Channels ---

    /// Register a new channel. Empty and duplicate names are rejected.
    pub fn create_channel(&self, config: ChannelConfig) -> ConvoyResult<()> {
        if config.name.trim().is_empty() {
            return Err(ConvoyError::Config("channel name must not be empty".into()));
        }
        let mut channels = self.channels.write();
        if channels.contains_key(&config.name) {
            return Err(ConvoyError::Config(format!(
                "channel '{}' already exists",
                config.name
            )));
        }
        debug!(channel = %config.name, kind = ?config.kind, "Channel created");
        let name = config.name.clone();
        channels.insert(name, Channel::new(config, self.config.channel_buffer_capacity));
        Ok(())
    }

    /// Create the channel unless it already exists. Returns whether it was created.
    pub fn ensure_channel(&self, config: ChannelConfig) -> bool {
        let mut channels = self.channels.write();
        if channels.contains_key(&config.name) {
            return false;
        }
        let name = config.name.clone();
        channels.insert(name, Channel::new(config, self.config.channel_buffer_capacity));
        true
    }

    /// Add a connected agent to a channel.
    pub fn join_channel(&self, agent: AgentId, name: &str) -> ConvoyResult<()> {
        let mut conns = self.connections.write();
        let conn = conns
            .get_mut(&agent)
            .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
        if !conn.is_connected() {
            return Err(ConvoyError::Connection(format!("agent {agent} is disconnected")));
        }
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(name)
            .ok_or_else(|| ConvoyError::UnknownChannel(name.to_string()))?;
        channel.members.insert(agent);
        conn.channels.insert(name.to_string());
        debug!(agent_id = %agent, channel = %name, "Joined channel");
        Ok(())
    }

    /// Remove an agent from a channel. Leaving twice is not an error.
    pub fn leave_channel(&self, agent: AgentId, name: &str) -> ConvoyResult<()> {
        let mut conns = self.connections.write();
        let conn = conns
            .get_mut(&agent)
            .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(name)
            .ok_or_else(|| ConvoyError::UnknownChannel(name.to_string()))?;
        channel.members.remove(&agent);
        conn.channels.remove(name);
        debug!(agent_id = %agent, channel = %name, "Left channel");
        Ok(())
    }

    // --- Message flow ---

    /// Accept one inbound message from a connected agent.
    ///
    /// Returns the number of agents the message was forwarded to.
    pub fn ingest(&self, agent: AgentId, mut message: BusMessage) -> ConvoyResult<usize> {
        {
            let mut conns = self.connections.write();
            let conn = conns
                .get_mut(&agent)
                .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
            if !conn.is_connected() {
                return Err(ConvoyError::Connection(format!("agent {agent} is disconnected")));
            }
            conn.touch();
        }
        message.from = agent.to_string();
        Ok(self.dispatch(Some(agent), message))
    }

    /// Inject a message from an in-process component (orchestrator, monitor).
    pub fn publish(&self, message: BusMessage) -> usize {
        self.dispatch(None, message)
    }

    fn dispatch(&self, from: Option<AgentId>, message: BusMessage) -> usize {
        self.counters.ingested.fetch_add(1, Ordering::Relaxed);
        self.history.lock().push(message.clone());

        if let Some(recipient) = message.to {
            let delivered = usize::from(self.send(recipient, &message));
            self.enqueue(message);
            return delivered;
        }

        let mut delivered = 0;
        for target in routing::targets(&message.kind, message.channel.as_deref()) {
            match self.route_from(from, &message, &target) {
                Ok(n) => delivered += n,
                Err(e) => warn!(kind = %message.kind, channel = %target, error = %e, "Routing failed"),
            }
        }
        delivered
    }

    /// Append to the channel buffer, forward to every member except the
    /// sender, and queue the message for its drain tick.
    pub fn route(&self, from: AgentId, message: &BusMessage, channel: &str) -> ConvoyResult<usize> {
        self.route_from(Some(from), message, channel)
    }

    fn route_from(
        &self,
        from: Option<AgentId>,
        message: &BusMessage,
        channel: &str,
    ) -> ConvoyResult<usize> {
        let mut routed = message.clone();
        routed.channel = Some(channel.to_string());

        let recipients: Vec<AgentId> = {
            let mut channels = self.channels.write();
            let target = channels
                .get_mut(channel)
                .ok_or_else(|| ConvoyError::UnknownChannel(channel.to_string()))?;
            target.buffer.push(routed.clone());
            target
                .members
                .iter()
                .copied()
                .filter(|member| Some(*member) != from)
                .collect()
        };

        let delivered = self.deliver_all(&recipients, &routed.to_frame());
        self.enqueue(routed);
        Ok(delivered)
    }

    /// Send directly to every member of a channel, skipping the original
    /// sender. Returns how many sends succeeded; an unknown channel yields 0.
    pub fn broadcast(&self, message: &BusMessage, channel: &str) -> usize {
        let mut routed = message.clone();
        routed.channel = Some(channel.to_string());

        let members: Vec<AgentId> = {
            let mut channels = self.channels.write();
            let Some(target) = channels.get_mut(channel) else {
                warn!(channel = %channel, "Broadcast to unknown channel");
                return 0;
            };
            target.buffer.push(routed.clone());
            target
                .members
                .iter()
                .copied()
                .filter(|member| member.to_string() != message.from)
                .collect()
        };

        self.deliver_all(&members, &routed.to_frame())
    }

    /// Best-effort delivery to one agent. Never errors.
    pub fn send(&self, agent: AgentId, message: &BusMessage) -> bool {
        self.send_frame(agent, &message.to_frame())
    }

    fn send_frame(&self, agent: AgentId, frame: &str) -> bool {
        let conns = self.connections.read();
        let Some(conn) = conns.get(&agent) else {
            debug!(agent_id = %agent, "Send to unknown agent");
            self.counters.failed_sends.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match conn.deliver(frame) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(agent_id = %agent, error = %e, "Send failed");
                self.counters.failed_sends.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn deliver_all(&self, recipients: &[AgentId], frame: &str) -> usize {
        recipients
            .iter()
            .filter(|agent| self.send_frame(**agent, frame))
            .count()
    }

    fn enqueue(&self, message: BusMessage) {
        if message.priority.is_urgent() {
            self.priority_queue.lock().push_back(message);
        } else {
            self.normal_queue.lock().push_back(message);
        }
    }

    // --- Draining ---

    /// Process everything queued on the priority queue at call time.
    pub fn drain_priority(&self) -> usize {
        let batch = std::mem::take(&mut *self.priority_queue.lock());
        self.process(batch)
    }

    /// Process everything queued on the normal queue at call time.
    pub fn drain_normal(&self) -> usize {
        let batch = std::mem::take(&mut *self.normal_queue.lock());
        self.process(batch)
    }

    fn process(&self, batch: VecDeque<BusMessage>) -> usize {
        let count = batch.len();
        for message in batch {
            match self.handlers.get(message.kind.as_str()) {
                Some(handler) => {
                    handler(self, &message);
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    debug!(kind = %message.kind, "No drain handler, dropping");
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        count
    }

    // --- Retention ---

    /// Evict everything older than the configured retention window.
    pub fn cleanup(&self) -> usize {
        self.cleanup_older_than(Utc::now() - self.config.retention())
    }

    /// Evict history and channel entries older than `cutoff`, and forget
    /// connections that disconnected before it. Returns evicted message count.
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = self.history.lock().retain(|m| m.timestamp >= cutoff);
        {
            let mut channels = self.channels.write();
            for channel in channels.values_mut() {
                evicted += channel.buffer.retain(|m| m.timestamp >= cutoff);
            }
        }
        self.connections
            .write()
            .retain(|_, c| c.is_connected() || c.disconnected_at.map_or(true, |t| t >= cutoff));
        if evicted > 0 {
            info!(evicted, "Retention sweep evicted messages");
        }
        evicted
    }

    // --- Views ---

    /// Sorted channel names.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every channel, sorted by name.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self.channels.read().values().map(Channel::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Members of a channel, sorted.
    pub fn channel_members(&self, name: &str) -> ConvoyResult<Vec<AgentId>> {
        let channels = self.channels.read();
        let channel = channels
            .get(name)
            .ok_or_else(|| ConvoyError::UnknownChannel(name.to_string()))?;
        let mut members: Vec<AgentId> = channel.members.iter().copied().collect();
        members.sort();
        Ok(members)
    }

    /// Buffered messages on a channel, oldest first.
    pub fn channel_messages(&self, name: &str) -> ConvoyResult<Vec<BusMessage>> {
        let channels = self.channels.read();
        let channel = channels
            .get(name)
            .ok_or_else(|| ConvoyError::UnknownChannel(name.to_string()))?;
        Ok(channel.buffer.to_vec())
    }

    /// Global history, oldest first.
    pub fn history(&self) -> Vec<BusMessage> {
        self.history.lock().to_vec()
    }

    /// Snapshot of one connection, open or retained.
    pub fn connection(&self, agent: AgentId) -> Option<ConnectionInfo> {
        self.connections.read().get(&agent).map(AgentConnection::info)
    }

    /// Snapshot of every known connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections.read().values().map(AgentConnection::info).collect()
    }

    /// Current counters and queue depths.
    pub fn stats(&self) -> BusStats {
        let (connected_agents, known_connections) = {
            let conns = self.connections.read();
            (conns.values().filter(|c| c.is_connected()).count(), conns.len())
        };
        BusStats {
            connected_agents,
            known_connections,
            channels: self.channels.read().len(),
            history_len: self.history.lock().len(),
            priority_queue_len: self.priority_queue.lock().len(),
            normal_queue_len: self.normal_queue.lock().len(),
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed_sends: self.counters.failed_sends.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for CommunicationBus {
    fn default() -> Self {
        Self::with_default_channels(BusConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use convoy_core::Priority;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect(bus: &CommunicationBus) -> (AgentId, mpsc::UnboundedReceiver<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = bus.connect(tx);
        // Discard the welcome frame.
        rx.try_recv().unwrap();
        (id, rx)
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn test_welcome_lists_channels() {
        let bus = CommunicationBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = bus.connect(tx);
        let welcome: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["content"]["agentId"], id.to_string());
        let channels = welcome["content"]["channels"].as_array().unwrap();
        assert!(channels.iter().any(|c| c == "system"));
    }

    #[test]
    fn test_join_is_symmetric_and_disconnect_prunes() {
        let bus = CommunicationBus::default();
        let (a, _rx) = connect(&bus);
        bus.join_channel(a, "system").unwrap();
        bus.join_channel(a, "workflow").unwrap();

        assert_eq!(bus.channel_members("system").unwrap(), vec![a]);
        assert_eq!(bus.connection(a).unwrap().channels, vec!["system", "workflow"]);

        bus.leave_channel(a, "workflow").unwrap();
        assert!(bus.channel_members("workflow").unwrap().is_empty());

        bus.disconnect(a).unwrap();
        assert!(bus.channel_members("system").unwrap().is_empty());
        assert!(bus.connection(a).unwrap().channels.is_empty());
    }

    #[test]
    fn test_join_unknown_sides() {
        let bus = CommunicationBus::default();
        let (a, _rx) = connect(&bus);
        assert!(matches!(
            bus.join_channel(a, "nowhere"),
            Err(ConvoyError::UnknownChannel(_))
        ));
        assert!(matches!(
            bus.join_channel(Uuid::new_v4(), "system"),
            Err(ConvoyError::UnknownAgent(_))
        ));
        // A failed join must not leave a half-written membership behind.
        assert!(bus.connection(a).unwrap().channels.is_empty());
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let bus = CommunicationBus::default();
        let err = bus
            .create_channel(ChannelConfig::new("system", ChannelKind::Broadcast))
            .unwrap_err();
        assert!(matches!(err, ConvoyError::Config(_)));
        assert!(!bus.ensure_channel(ChannelConfig::new("system", ChannelKind::Broadcast)));
        assert!(bus.ensure_channel(ChannelConfig::new("fresh", ChannelKind::Agent)));
    }

    #[test]
    fn test_explicit_recipient_skips_fanout() {
        let bus = CommunicationBus::default();
        let (a, _rx_a) = connect(&bus);
        let (b, mut rx_b) = connect(&bus);
        let (c, mut rx_c) = connect(&bus);
        for id in [a, b, c] {
            bus.join_channel(id, "coordination").unwrap();
        }

        let msg = BusMessage::new(kinds::COORDINATION_REQUEST, "", json!({})).to_agent(b);
        assert_eq!(bus.ingest(a, msg).unwrap(), 1);
        assert_eq!(frames(&mut rx_b).len(), 1);
        assert!(frames(&mut rx_c).is_empty());
        assert_eq!(bus.history().len(), 1);
    }

    #[test]
    fn test_ingest_from_disconnected_agent_fails() {
        let bus = CommunicationBus::default();
        let (a, _rx) = connect(&bus);
        bus.disconnect(a).unwrap();
        let msg = BusMessage::new(kinds::AGENT_STATUS, "", json!({}));
        assert!(matches!(bus.ingest(a, msg), Err(ConvoyError::Connection(_))));
    }

    #[test]
    fn test_send_to_disconnected_returns_false() {
        let bus = CommunicationBus::default();
        let (a, _rx) = connect(&bus);
        bus.disconnect(a).unwrap();
        let msg = BusMessage::new(kinds::AGENT_STATUS, "bus", json!({}));
        assert!(!bus.send(a, &msg));
        assert!(!bus.send(Uuid::new_v4(), &msg));
        assert_eq!(bus.stats().failed_sends, 2);
    }

    #[test]
    fn test_priority_split_and_drain() {
        let bus = CommunicationBus::default();
        bus.publish(BusMessage::new(kinds::WORKFLOW_UPDATE, "orchestrator", json!({})));
        bus.publish(
            BusMessage::new(kinds::PERFORMANCE_ALERT, "monitor", json!({}))
                .with_priority(Priority::High),
        );
        bus.publish(BusMessage::new("mystery", "monitor", json!({})).with_priority(Priority::Critical));

        let stats = bus.stats();
        assert_eq!(stats.priority_queue_len, 2);
        assert_eq!(stats.normal_queue_len, 1);

        assert_eq!(bus.drain_priority(), 2);
        let stats = bus.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.priority_queue_len, 0);
        assert_eq!(stats.normal_queue_len, 1);

        assert_eq!(bus.drain_normal(), 1);
        assert_eq!(bus.drain_normal(), 0);
    }

    #[test]
    fn test_error_report_fans_out_to_urgent_and_debug() {
        let bus = CommunicationBus::default();
        let (watcher, mut rx) = connect(&bus);
        bus.join_channel(watcher, "urgent").unwrap();
        bus.join_channel(watcher, "debug").unwrap();

        bus.publish(
            BusMessage::new(kinds::ERROR_REPORT, "orchestrator", json!({"error": "boom"}))
                .with_priority(Priority::High),
        );
        assert!(frames(&mut rx).is_empty());

        bus.drain_priority();
        let received = frames(&mut rx);
        let channels: Vec<&str> = received
            .iter()
            .map(|f| f["channel"].as_str().unwrap())
            .collect();
        assert_eq!(received.len(), 2);
        assert!(channels.contains(&"urgent"));
        assert!(channels.contains(&"debug"));
    }

    #[test]
    fn test_agent_status_updates_reported_status() {
        let bus = CommunicationBus::default();
        let (a, _rx) = connect(&bus);
        bus.ingest(a, BusMessage::new(kinds::AGENT_STATUS, "", json!({"status": "busy"})))
            .unwrap();
        bus.drain_normal();
        assert_eq!(bus.connection(a).unwrap().reported_status.as_deref(), Some("busy"));
    }

    #[test]
    fn test_cleanup_evicts_old_entries() {
        let bus = CommunicationBus::default();
        let mut old = BusMessage::new(kinds::WORKFLOW_UPDATE, "orchestrator", json!({}));
        old.timestamp = Utc::now() - chrono::Duration::days(3);
        bus.publish(old);
        bus.publish(BusMessage::new(kinds::WORKFLOW_UPDATE, "orchestrator", json!({})));

        // One history entry plus one workflow buffer entry.
        assert_eq!(bus.cleanup(), 2);
        assert_eq!(bus.history().len(), 1);
        assert_eq!(bus.channel_messages("workflow").unwrap().len(), 1);
    }

    #[test]
    fn test_close_all() {
        let bus = CommunicationBus::default();
        let (a, _ra) = connect(&bus);
        let (b, _rb) = connect(&bus);
        bus.join_channel(a, "system").unwrap();
        bus.join_channel(b, "system").unwrap();
        assert_eq!(bus.close_all(), 2);
        assert!(bus.channel_members("system").unwrap().is_empty());
        assert_eq!(bus.stats().connected_agents, 0);
        assert_eq!(bus.stats().known_connections, 2);
    }

    #[test]
    fn test_connect_as_rejects_live_duplicate() {
        let bus = CommunicationBus::default();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.connect_as(id, tx).unwrap();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(bus.connect_as(id, tx2).is_err());

        bus.disconnect(id).unwrap();
        let (tx3, _rx3) = mpsc::unbounded_channel();
        bus.connect_as(id, tx3).unwrap();
        assert!(bus.connection(id).unwrap().channels.is_empty());
    }
}
