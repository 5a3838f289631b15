//! Top-level client: identity, event bus, node registry, player routing.

use std::sync::Arc;

use tokio::sync::broadcast;

use croonconf::{CroonConfig, IdentityConfig, NodeDescriptor};

use crate::error::NodeError;
use crate::events::{EventBus, NodeEvent};
use crate::node::Node;
use crate::players::PlayerRegistry;
use crate::registry::NodeRegistry;
use crate::socket::SocketOptions;

/// Who this client is when it handshakes with a node.
///
/// Supplied once at construction and immutable for the lifetime of every
/// node registered afterwards.
#[derive(Debug, Clone, Copy)]
pub struct ClientIdentity {
    /// Bot user id, sent as the `User-Id` header.
    pub user_id: u64,
    /// Total shard count, sent as the `Num-Shards` header.
    pub shard_count: u32,
}

impl From<&IdentityConfig> for ClientIdentity {
    fn from(config: &IdentityConfig) -> Self {
        Self {
            user_id: config.user_id,
            shard_count: config.shard_count,
        }
    }
}

/// The audio cluster client.
///
/// Owns the node registry and the player router, plus the event bus their
/// connection tasks publish to. Construct inside a tokio runtime; node
/// connections are background tasks.
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use croonconf::CroonConfig;
/// use crooner::Client;
///
/// let config = CroonConfig::load()?;
/// let client = Client::from_config(&config)?;
///
/// let player = client.players().get_or_create(506381097473310721)?;
/// player.send(serde_json::json!({
///     "op": "play",
///     "guildId": "506381097473310721",
///     "track": "...",
/// }));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    identity: ClientIdentity,
    events: EventBus,
    nodes: Arc<NodeRegistry>,
    players: PlayerRegistry,
}

impl Client {
    pub fn new(user_id: u64, shard_count: u32) -> Self {
        Self::with_options(
            ClientIdentity {
                user_id,
                shard_count,
            },
            SocketOptions::default(),
        )
    }

    pub fn with_options(identity: ClientIdentity, options: SocketOptions) -> Self {
        let events = EventBus::default();
        let nodes = Arc::new(NodeRegistry::with_options(
            identity,
            events.clone(),
            options,
        ));
        let players = PlayerRegistry::new(Arc::clone(&nodes));
        Self {
            identity,
            events,
            nodes,
            players,
        }
    }

    /// Build a client from configuration and register its nodes.
    ///
    /// Connections proceed in the background; nothing is healthy on return.
    pub fn from_config(config: &CroonConfig) -> Result<Self, NodeError> {
        let client = Self::new(config.identity.user_id, config.identity.shard_count);
        for descriptor in &config.nodes {
            client.add_node(descriptor.clone())?;
        }
        Ok(client)
    }

    pub fn identity(&self) -> ClientIdentity {
        self.identity
    }

    /// Register a node and start connecting to it.
    pub fn add_node(&self, descriptor: NodeDescriptor) -> Result<Arc<Node>, NodeError> {
        self.nodes.add_node(descriptor)
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    /// Subscribe to node state transitions and passthrough frames.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Shut down every node connection. Terminal.
    pub fn shutdown(&self) {
        self.nodes.shutdown();
    }
}

/// Set up stdout logging at debug level for this crate.
///
/// Exists solely to make things easier for end users debugging node
/// connectivity; real deployments configure `tracing-subscriber` themselves.
pub fn enable_debug_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crooner=debug".into()),
        )
        .try_init();
}
