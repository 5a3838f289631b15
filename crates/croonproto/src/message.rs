//! Inbound frame decoding.
//!
//! Frames are JSON objects dispatched on their `"op"` field. The core only
//! interprets `stats`; everything else is surfaced as an opaque passthrough
//! for external collaborators (event dispatch, player update handling).

use serde_json::Value;
use thiserror::Error;

use crate::stats::NodeStats;

/// Decoding errors for inbound frames.
///
/// All of these are treated as malformed input by the receive loop: logged
/// and dropped, never fatal to the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no string \"op\" field")]
    MissingOp,

    #[error("stats frame malformed: {0}")]
    BadStats(serde_json::Error),
}

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// A `stats` frame; replaces the node's load snapshot.
    Stats(NodeStats),
    /// Any other op, passed through unexamined.
    Passthrough {
        op: String,
        payload: Value,
    },
}

impl ServerMessage {
    /// Decode a text frame received from a node.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let payload: Value = serde_json::from_str(text)?;

        let op = payload
            .get("op")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingOp)?
            .to_string();

        if op == "stats" {
            let stats =
                serde_json::from_value(payload.clone()).map_err(ProtocolError::BadStats)?;
            Ok(ServerMessage::Stats(stats))
        } else {
            Ok(ServerMessage::Passthrough { op, payload })
        }
    }
}
