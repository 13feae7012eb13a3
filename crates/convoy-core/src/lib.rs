//! Core types and error definitions for the Convoy agent fleet.
//!
//! This crate provides the foundational types shared across all Convoy crates:
//! the unified error enum, the bus message record and its priority tiers, and
//! the cooperative shutdown signal used by every periodic loop.
//!
//! # Main types
//!
//! - [`ConvoyError`]: Unified error enum for all Convoy subsystems.
//! - [`ConvoyResult`]: Convenience alias for `Result<T, ConvoyError>`.
//! - [`BusMessage`]: A structured record routed by the communication bus.
//! - [`Priority`]: Delivery tier (`normal`, `high`, `critical`).
//! - [`Shutdown`]: Cloneable shutdown trigger with [`ShutdownListener`]s.

/// Error enum and result alias.
pub mod error;
/// Bus message record, priority tiers and well-known type tags.
pub mod message;
/// Cooperative shutdown signal.
pub mod shutdown;

pub use error::{ConvoyError, ConvoyResult};
pub use message::{kinds, BusMessage, Priority};
pub use shutdown::{Shutdown, ShutdownListener};

/// Identifier of an agent, shared by bus connections and registry entries.
pub type AgentId = uuid::Uuid;
