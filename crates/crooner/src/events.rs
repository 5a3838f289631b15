//! Event fan-out for node state transitions.
//!
//! The bus is an explicitly constructed object owned by the [`Client`] and
//! handed to each connection task - no global hook registry. The core emits
//! transitions as plain data; delivering them to user callbacks is the
//! subscriber's concern.
//!
//! [`Client`]: crate::Client

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// A notable transition or passthrough frame from one node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The node's connection handshake completed.
    Connected { node: String },

    /// The node's connection dropped; reconnection is already underway
    /// unless the node is shutting down.
    Disconnected {
        node: String,
        /// Close code from the remote, when it sent a close frame.
        code: Option<u16>,
        reason: String,
    },

    /// A new stats snapshot replaced the node's previous one.
    StatsUpdated { node: String },

    /// An inbound frame with an op the core does not interpret,
    /// passed through to external collaborators unexamined.
    Message {
        node: String,
        op: String,
        payload: Value,
    },
}

/// Broadcast channel wrapper carrying [`NodeEvent`]s to any number of
/// subscribers. Cheap to clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers. Lagging or absent
    /// subscribers are not an error.
    pub fn emit(&self, event: NodeEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("no event subscribers: {}", e);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
