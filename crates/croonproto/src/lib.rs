//! croonproto - Protocol types for the Crooner audio node link
//!
//! This crate defines the messages exchanged with a remote audio node over
//! its WebSocket endpoint, and the load-scoring math derived from them.
//!
//! ## Wire Format
//!
//! Every frame is a JSON object carrying an `"op"` field:
//!
//! ```text
//! {"op": "stats", "players": 3, "playingPlayers": 1, ...}
//! {"op": "event", ...}
//! ```
//!
//! Only `op == "stats"` is consumed by the core; its payload becomes the
//! node's [`NodeStats`] snapshot. Every other op is passed through to
//! external collaborators unexamined (see [`ServerMessage::Passthrough`]).
//!
//! Outbound frames are arbitrary `{"op": ..., ...}` objects built by the
//! caller; the core sends them fire-and-forget and never awaits a response.
//!
//! ## Penalty Scoring
//!
//! [`NodeStats::penalty`] folds CPU load, playing-player count and
//! frame-loss telemetry into a single non-negative score. Lower is better;
//! the node registry picks the healthy node with the lowest score.

pub mod message;
pub mod stats;

pub use message::{ProtocolError, ServerMessage};
pub use stats::{CpuStats, FrameStats, MemoryStats, NodeStats};
