//! crooner - resilient client for clusters of remote audio-processing nodes
//!
//! Crooner maintains one duplex WebSocket per remote audio node, tracks each
//! node's reported load, and routes every guild's player to the healthy node
//! with the best derived score. Nodes that drop reconnect forever in the
//! background; players on a dead node are rebound lazily on their next
//! operation.
//!
//! ## Layout
//!
//! - [`socket`] - the per-node connection task: handshake, reconnect,
//!   outbound queue, receive loop.
//! - [`node`] - one node's identity, health and stats snapshot.
//! - [`registry`] - the node set and best-node selection.
//! - [`players`] - guild-to-node bindings and lazy failover.
//! - [`events`] - the injectable event bus connection tasks publish to.
//! - [`client`] - the top level tying those together, plus config loading
//!   via the `croonconf` crate.
//!
//! ## Failure policy
//!
//! Transport failures never escape the connection layer; they are retried on
//! a fixed interval until an explicit shutdown. Malformed inbound frames are
//! logged and dropped. The only errors callers see are
//! [`NodeError::NoAvailableNode`] when the whole cluster is down and
//! [`NodeError::UnknownNode`]/[`NodeError::DuplicateNode`] on registry
//! misuse.

pub mod client;
pub mod error;
pub mod events;
pub mod node;
pub mod players;
pub mod registry;
pub mod socket;

pub use client::{enable_debug_logging, Client, ClientIdentity};
pub use error::NodeError;
pub use events::{EventBus, NodeEvent};
pub use node::Node;
pub use players::{Player, PlayerRegistry};
pub use registry::NodeRegistry;
pub use socket::{NodeSocket, SocketOptions, SocketState};

pub use croonconf::NodeDescriptor;
pub use croonproto::{NodeStats, ServerMessage};
