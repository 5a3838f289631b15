//! One remote audio node: identity, connection, health, and load.

use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use croonconf::NodeDescriptor;
use croonproto::NodeStats;

use crate::client::ClientIdentity;
use crate::events::EventBus;
use crate::socket::{self, NodeSocket, SocketOptions, SocketState};

/// A remote audio-processing node.
///
/// Owned by the [`NodeRegistry`]; everything else holds `Arc` references.
/// Identity is immutable for the node's lifetime. Health is defined entirely
/// by the connection: a node is healthy exactly while its socket is
/// [`Connected`](SocketState::Connected).
///
/// [`NodeRegistry`]: crate::registry::NodeRegistry
#[derive(Debug)]
pub struct Node {
    descriptor: NodeDescriptor,
    /// Latest stats snapshot, replaced wholesale on every `stats` frame.
    stats: RwLock<Option<NodeStats>>,
    socket: NodeSocket,
}

impl Node {
    pub(crate) fn new(descriptor: NodeDescriptor, options: SocketOptions) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            stats: RwLock::new(None),
            socket: NodeSocket::new(options),
        })
    }

    /// Spawn the connection task. The node is not connected on return;
    /// the task handshakes in the background.
    pub(crate) fn start(self: &Arc<Self>, identity: ClientIdentity, events: EventBus) {
        tokio::spawn(socket::run(Arc::clone(self), identity, events));
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// True exactly while the connection is up.
    pub fn is_healthy(&self) -> bool {
        self.socket.state() == SocketState::Connected
    }

    /// Latest stats snapshot, if any has arrived this connection epoch or
    /// before.
    pub fn stats(&self) -> Option<NodeStats> {
        *self.stats.read().unwrap()
    }

    /// Derived load score; lower is better.
    ///
    /// Unhealthy nodes and nodes that have not reported stats yet score
    /// infinity, so they are never preferred over any scored healthy node.
    pub fn penalty(&self) -> f64 {
        if !self.is_healthy() {
            return f64::INFINITY;
        }
        match *self.stats.read().unwrap() {
            Some(stats) => stats.penalty(),
            None => f64::INFINITY,
        }
    }

    /// Send a payload to this node, fire-and-forget. Queued if the
    /// connection is down.
    pub fn send(&self, payload: Value) {
        self.socket.send(payload);
    }

    pub(crate) fn update_stats(&self, stats: NodeStats) {
        debug!(
            "node `{}` stats: {} playing, penalty {:.2}",
            self.name(),
            stats.playing_players,
            stats.penalty()
        );
        *self.stats.write().unwrap() = Some(stats);
    }

    pub(crate) fn socket(&self) -> &NodeSocket {
        &self.socket
    }

    pub(crate) fn shutdown(&self) {
        self.socket.shutdown();
    }
}
