//! Node ownership and best-node selection.

use std::sync::Arc;
use std::sync::RwLock;

use tracing::info;

use croonconf::NodeDescriptor;

use crate::client::ClientIdentity;
use crate::error::NodeError;
use crate::events::EventBus;
use crate::node::Node;
use crate::socket::SocketOptions;

/// Owns the set of registered nodes and answers "which node should host a
/// new player".
///
/// Nodes are kept in registration order; selection ties break toward the
/// first-registered node, which keeps repeated calls deterministic. The set
/// is small (tens of nodes), so selection is a plain O(n) scan.
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<Arc<Node>>>,
    identity: ClientIdentity,
    events: EventBus,
    options: SocketOptions,
}

impl NodeRegistry {
    pub fn new(identity: ClientIdentity, events: EventBus) -> Self {
        Self::with_options(identity, events, SocketOptions::default())
    }

    pub fn with_options(
        identity: ClientIdentity,
        events: EventBus,
        options: SocketOptions,
    ) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            identity,
            events,
            options,
        }
    }

    /// Register a node and start connecting to it.
    ///
    /// Returns as soon as the connection task is spawned; the node is not
    /// healthy yet and callers must not assume readiness.
    pub fn add_node(&self, descriptor: NodeDescriptor) -> Result<Arc<Node>, NodeError> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.iter().any(|n| n.name() == descriptor.name) {
            return Err(NodeError::DuplicateNode {
                name: descriptor.name,
            });
        }

        info!(
            "registering node `{}` at {}:{}",
            descriptor.name, descriptor.host, descriptor.port
        );
        let node = Node::new(descriptor, self.options.clone());
        node.start(self.identity, self.events.clone());
        nodes.push(Arc::clone(&node));
        Ok(node)
    }

    /// Register a node without spawning its connection task, so tests can
    /// drive socket state by hand.
    #[cfg(test)]
    pub(crate) fn add_unstarted(&self, descriptor: NodeDescriptor) -> Arc<Node> {
        let node = Node::new(descriptor, self.options.clone());
        self.nodes.write().unwrap().push(Arc::clone(&node));
        node
    }

    /// Shut the node's connection down and drop it from the set.
    ///
    /// Players bound to it are not migrated here; the session router rebinds
    /// them lazily on their next operation.
    pub fn remove_node(&self, name: &str) -> Result<(), NodeError> {
        let mut nodes = self.nodes.write().unwrap();
        match nodes.iter().position(|n| n.name() == name) {
            Some(index) => {
                let node = nodes.remove(index);
                node.shutdown();
                info!("removed node `{}`", name);
                Ok(())
            }
            None => Err(NodeError::UnknownNode {
                name: name.to_string(),
            }),
        }
    }

    /// Look up a node by name.
    pub fn get(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .unwrap()
            .iter()
            .find(|n| n.name() == name)
            .map(Arc::clone)
    }

    /// Snapshot of all registered nodes, in registration order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().unwrap().to_vec()
    }

    /// The healthy node with the lowest penalty.
    ///
    /// Penalties are read at call time; the winner can become stale
    /// immediately afterwards, which is acceptable for load balancing.
    pub fn best_node(&self) -> Result<Arc<Node>, NodeError> {
        let nodes = self.nodes.read().unwrap();

        let mut best: Option<(&Arc<Node>, f64)> = None;
        for node in nodes.iter().filter(|n| n.is_healthy()) {
            let penalty = node.penalty();
            // Strict comparison keeps the first-registered node on ties
            if best.map_or(true, |(_, lowest)| penalty < lowest) {
                best = Some((node, penalty));
            }
        }

        best.map(|(node, _)| Arc::clone(node))
            .ok_or(NodeError::NoAvailableNode)
    }

    /// Shut down every node's connection. The registry is unusable for
    /// selection afterwards.
    pub fn shutdown(&self) {
        for node in self.nodes.read().unwrap().iter() {
            node.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::SocketState;
    use croonproto::{CpuStats, MemoryStats, NodeStats};
    use pretty_assertions::assert_eq;

    fn descriptor(name: &str, port: u16) -> NodeDescriptor {
        NodeDescriptor {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            password: "youshallnotpass".to_string(),
        }
    }

    fn stats_with_playing(playing: u32) -> NodeStats {
        NodeStats {
            players: playing,
            playing_players: playing,
            cpu: CpuStats {
                cores: 4,
                system_load: 0.0,
                lavalink_load: 0.0,
            },
            memory: MemoryStats {
                free: 0,
                used: 0,
                allocated: 0,
                reservable: 0,
            },
            frame_stats: None,
        }
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(
            ClientIdentity {
                user_id: 1,
                shard_count: 1,
            },
            EventBus::default(),
        )
    }

    /// Register a node and force its observable state. No connection task is
    /// spawned, so the forced state stays put.
    fn add_forced(
        registry: &NodeRegistry,
        name: &str,
        port: u16,
        healthy: bool,
        playing: Option<u32>,
    ) -> Arc<Node> {
        let node = registry.add_unstarted(descriptor(name, port));
        if healthy {
            node.socket().set_state(SocketState::Connected);
        }
        if let Some(playing) = playing {
            node.update_stats(stats_with_playing(playing));
        }
        node
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = registry();
        registry.add_node(descriptor("nearby", 21001)).unwrap();
        let err = registry.add_node(descriptor("nearby", 21002)).unwrap_err();
        assert!(matches!(err, NodeError::DuplicateNode { .. }));
    }

    #[test]
    fn test_remove_unknown_node() {
        let registry = registry();
        let err = registry.remove_node("missing").unwrap_err();
        assert!(matches!(err, NodeError::UnknownNode { .. }));
    }

    #[test]
    fn test_best_node_prefers_lowest_penalty() {
        // Scenario A: N1 penalty 50, N2 penalty 20, both healthy
        let registry = registry();
        add_forced(&registry, "n1", 21011, true, Some(50));
        add_forced(&registry, "n2", 21012, true, Some(20));

        assert_eq!(registry.best_node().unwrap().name(), "n2");
    }

    #[test]
    fn test_best_node_skips_unhealthy() {
        // Scenario B: the better node goes unhealthy
        let registry = registry();
        add_forced(&registry, "n1", 21021, true, Some(50));
        let n2 = add_forced(&registry, "n2", 21022, true, Some(20));

        n2.socket().set_state(SocketState::Disconnected);
        assert_eq!(registry.best_node().unwrap().name(), "n1");
    }

    #[test]
    fn test_no_available_node() {
        // Scenario C: all nodes unhealthy
        let registry = registry();
        add_forced(&registry, "n1", 21031, false, None);
        add_forced(&registry, "n2", 21032, false, None);

        let err = registry.best_node().unwrap_err();
        assert!(matches!(err, NodeError::NoAvailableNode));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let registry = registry();
        add_forced(&registry, "n1", 21041, true, Some(10));
        add_forced(&registry, "n2", 21042, true, Some(10));
        add_forced(&registry, "n3", 21043, true, Some(10));

        // Identical penalties: first-registered wins, every time
        for _ in 0..5 {
            assert_eq!(registry.best_node().unwrap().name(), "n1");
        }
    }

    #[test]
    fn test_healthy_node_without_stats_loses_to_scored_node() {
        let registry = registry();
        add_forced(&registry, "fresh", 21051, true, None);
        add_forced(&registry, "scored", 21052, true, Some(100));

        assert_eq!(registry.best_node().unwrap().name(), "scored");
    }

    #[test]
    fn test_healthy_node_without_stats_is_still_selectable() {
        let registry = registry();
        add_forced(&registry, "fresh", 21061, true, None);

        assert_eq!(registry.best_node().unwrap().name(), "fresh");
    }

    #[test]
    fn test_remove_shuts_node_down() {
        let registry = registry();
        let node = add_forced(&registry, "n1", 21071, true, None);
        registry.remove_node("n1").unwrap();

        assert_eq!(node.socket().state(), SocketState::ShuttingDown);
        assert!(registry.get("n1").is_none());
    }
}
