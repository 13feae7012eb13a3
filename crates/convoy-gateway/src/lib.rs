//! HTTP and WebSocket front door for the Convoy fleet.
//!
//! Each WebSocket is one bus connection. HTTP endpoints expose health,
//! status and workflow runs.

/// Inbound frame handling for agent sockets.
pub mod router;
/// Axum server: routes, handlers and shared state.
pub mod server;

pub use router::{ControlFrame, FrameRouter};
pub use server::{AppState, GatewayServer, StartWorkflowRequest};
