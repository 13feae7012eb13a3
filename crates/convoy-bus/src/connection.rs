use chrono::{DateTime, Utc};
use convoy_core::{AgentId, ConvoyError, ConvoyResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Outbound transport handle: one text frame per message.
pub type Transport = mpsc::UnboundedSender<String>;

/// Whether a connection can still receive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Transport open.
    Connected,
    /// Closed; kept until the retention sweep.
    Disconnected,
}

/// Per-agent connection record held by the bus.
#[derive(Debug)]
pub(crate) struct AgentConnection {
    pub(crate) id: AgentId,
    pub(crate) status: ConnectionStatus,
    pub(crate) connected_at: DateTime<Utc>,
    pub(crate) last_seen: DateTime<Utc>,
    pub(crate) disconnected_at: Option<DateTime<Utc>>,
    /// Channel names this agent is a member of. Mirrors `Channel::members`.
    pub(crate) channels: HashSet<String>,
    /// Last status the agent reported via `agent_status`.
    pub(crate) reported_status: Option<String>,
    transport: Option<Transport>,
}

impl AgentConnection {
    pub(crate) fn new(id: AgentId, transport: Transport) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: ConnectionStatus::Connected,
            connected_at: now,
            last_seen: now,
            disconnected_at: None,
            channels: HashSet::new(),
            reported_status: None,
            transport: Some(transport),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub(crate) fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Push a frame down the transport. Fails when disconnected or the receiver is gone.
    pub(crate) fn deliver(&self, frame: &str) -> ConvoyResult<()> {
        match (&self.transport, self.status) {
            (Some(tx), ConnectionStatus::Connected) => tx
                .send(frame.to_string())
                .map_err(|_| ConvoyError::Connection(format!("transport closed for {}", self.id))),
            _ => Err(ConvoyError::Connection(format!("agent {} disconnected", self.id))),
        }
    }

    /// Flip to disconnected and drop the transport, returning the channel
    /// memberships that must be pruned.
    pub(crate) fn close(&mut self) -> HashSet<String> {
        self.status = ConnectionStatus::Disconnected;
        self.disconnected_at = Some(Utc::now());
        self.transport = None;
        std::mem::take(&mut self.channels)
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort();
        ConnectionInfo {
            id: self.id,
            status: self.status,
            connected_at: self.connected_at,
            last_seen: self.last_seen,
            disconnected_at: self.disconnected_at,
            channels,
            reported_status: self.reported_status.clone(),
        }
    }
}

/// Serializable view of an [`AgentConnection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Agent id.
    pub id: AgentId,
    /// Open or closed.
    pub status: ConnectionStatus,
    /// When the agent connected.
    pub connected_at: DateTime<Utc>,
    /// Last inbound message or status update.
    pub last_seen: DateTime<Utc>,
    /// When the connection closed.
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Joined channels, sorted.
    pub channels: Vec<String>,
    /// Last status the agent reported via `agent_status`.
    pub reported_status: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_deliver_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = AgentConnection::new(Uuid::new_v4(), tx);
        conn.channels.insert("system".into());

        conn.deliver("hello").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");

        let pruned = conn.close();
        assert!(pruned.contains("system"));
        assert!(conn.channels.is_empty());
        assert!(!conn.is_connected());
        assert!(matches!(conn.deliver("again"), Err(ConvoyError::Connection(_))));
    }

    #[test]
    fn test_deliver_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = AgentConnection::new(Uuid::new_v4(), tx);
        drop(rx);
        let err = conn.deliver("lost").unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(conn.is_connected());
    }
}
