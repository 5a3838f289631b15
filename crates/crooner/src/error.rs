//! Errors that cross the boundary to session-management code.
//!
//! Transport failures and malformed inbound frames never appear here; the
//! connection layer recovers from those on its own. Only absence of capacity
//! and registry misuse are surfaced to callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// No registered node is currently healthy.
    #[error("no available audio node")]
    NoAvailableNode,

    /// An operation referenced a node name the registry does not hold.
    #[error("unknown node `{name}`")]
    UnknownNode { name: String },

    /// A node with this name is already registered.
    #[error("node `{name}` is already registered")]
    DuplicateNode { name: String },
}
