//! Real-time publish/subscribe bus between fleet agents.
//!
//! Agents connect with an outbound transport handle, join named channels and
//! send typed messages. A static routing table maps each message type to its
//! channels; routed messages are buffered per channel, forwarded to members
//! and queued for drain-time handlers on a priority or a normal tick.
//!
//! # Main types
//!
//! - [`CommunicationBus`]: Connections, channels, routing, queues and retention.
//! - [`ChannelConfig`]: Name, kind, description and priority of a channel.
//! - [`BusConfig`]: Tick intervals, retention window and buffer capacities.
//! - [`BusStats`]: Point-in-time counters for monitoring.

/// Fixed-capacity FIFO used for history and channel buffers.
pub mod buffer;
/// The bus itself.
pub mod bus;
/// Channel configuration and state.
pub mod channel;
/// Bus configuration.
pub mod config;
/// Per-agent connection records.
pub mod connection;
/// Drain-time message handlers.
pub mod handlers;
/// Tick loop driving drains and retention sweeps.
pub mod pump;
/// Message-type routing table.
pub mod routing;

pub use buffer::BoundedBuffer;
pub use bus::{BusStats, CommunicationBus};
pub use channel::{agent_channel_name, default_channels, ChannelConfig, ChannelInfo, ChannelKind};
pub use config::BusConfig;
pub use connection::{ConnectionInfo, ConnectionStatus, Transport};
