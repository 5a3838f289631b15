//! Guild-to-node session routing.
//!
//! Each guild's player is bound to exactly one node. When that node drops,
//! the binding goes stale and the next access rebinds through best-node
//! selection - deliberately lazy, so a recovering cluster is not flooded
//! with simultaneous rebinds.

use std::sync::Arc;
use std::sync::RwLock;

use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use crate::error::NodeError;
use crate::node::Node;
use crate::registry::NodeRegistry;

/// One guild's playback binding: which node hosts it.
///
/// Holds a non-owning reference to its node; the registry owns node
/// lifetimes. The binding is swapped wholesale on rebind, never mutated.
#[derive(Debug)]
pub struct Player {
    guild_id: u64,
    node: RwLock<Arc<Node>>,
}

impl Player {
    fn new(guild_id: u64, node: Arc<Node>) -> Self {
        Self {
            guild_id,
            node: RwLock::new(node),
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// The node currently hosting this player.
    pub fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node.read().unwrap())
    }

    /// Whether the binding points at a healthy node right now.
    pub fn is_stale(&self) -> bool {
        !self.node().is_healthy()
    }

    /// Send a payload to this player's node, fire-and-forget.
    pub fn send(&self, payload: Value) {
        self.node().send(payload);
    }

    fn rebind(&self, node: Arc<Node>) {
        *self.node.write().unwrap() = node;
    }
}

/// Maps guild ids to players and keeps each player on a healthy node.
#[derive(Debug)]
pub struct PlayerRegistry {
    players: DashMap<u64, Arc<Player>>,
    nodes: Arc<NodeRegistry>,
}

impl PlayerRegistry {
    pub fn new(nodes: Arc<NodeRegistry>) -> Self {
        Self {
            players: DashMap::new(),
            nodes,
        }
    }

    /// The player for a guild, created and bound on first use.
    ///
    /// A new player is bound via best-node selection; a player becomes stale
    /// when its node goes unhealthy, is rebound here on access. Fails with
    /// [`NodeError::NoAvailableNode`] when no node is healthy - players are
    /// never created or left without a node silently.
    pub fn get_or_create(&self, guild_id: u64) -> Result<Arc<Player>, NodeError> {
        if let Some(existing) = self.players.get(&guild_id) {
            let player = Arc::clone(&existing);
            drop(existing);
            self.rebind_if_stale(&player)?;
            return Ok(player);
        }

        let node = self.nodes.best_node()?;
        info!("binding guild {} to node `{}`", guild_id, node.name());
        let player = self
            .players
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Player::new(guild_id, node)));
        Ok(Arc::clone(&player))
    }

    /// Look up a player without creating or rebinding.
    pub fn get(&self, guild_id: u64) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|p| Arc::clone(&p))
    }

    /// Release a guild's binding. The node is unaffected.
    pub fn remove(&self, guild_id: u64) -> Option<Arc<Player>> {
        self.players.remove(&guild_id).map(|(_, player)| player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn rebind_if_stale(&self, player: &Arc<Player>) -> Result<(), NodeError> {
        if !player.is_stale() {
            return Ok(());
        }
        let replacement = self.nodes.best_node()?;
        info!(
            "rebinding guild {} from `{}` to `{}`",
            player.guild_id(),
            player.node().name(),
            replacement.name()
        );
        player.rebind(replacement);
        Ok(())
    }
}
