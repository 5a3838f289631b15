//! Load telemetry snapshots reported by a node's `stats` frames.
//!
//! A [`NodeStats`] is a value object: each `stats` frame replaces the node's
//! snapshot wholesale, never mutating it in place. The derived
//! [`penalty`](NodeStats::penalty) score is what the selection algorithm
//! compares across nodes.

use serde::{Deserialize, Serialize};

/// Frame-loss counters over the node's reporting window.
///
/// Absent from the wire when the node has no active playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    /// Audio frames sent to the voice gateway.
    pub sent: i64,
    /// Frames replaced with silence.
    pub nulled: i64,
    /// Frames that should have been sent but were not.
    pub deficit: i64,
}

/// CPU telemetry for the node's host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    /// Core count on the node's host.
    pub cores: u32,
    /// Whole-system load, in `[0, 1]`.
    pub system_load: f64,
    /// Load attributable to the audio process itself, in `[0, 1]`.
    pub lavalink_load: f64,
}

/// Memory telemetry for the node's process, all in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

/// One load/status snapshot from a node, replaced on every `stats` frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    /// Total players the node is hosting.
    pub players: u32,
    /// Players actively playing right now.
    pub playing_players: u32,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    /// Absent when the node reports zero active playback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_stats: Option<FrameStats>,
}

/// Frame counters are normalized over this many frames per reporting window.
const FRAMES_PER_WINDOW: f64 = 3000.0;

impl NodeStats {
    /// Derived load score; lower means more preferred for new work.
    ///
    /// Playing-player count is a coarse proxy always available. CPU load is
    /// raised to the 10th power so a near-saturated node scores far worse
    /// than a lightly loaded one. Frame deficit and nulled counters indicate
    /// degraded audio directly, so they are weighted heavily; a node with no
    /// active playback reports no frame stats and contributes zero there.
    pub fn penalty(&self) -> f64 {
        let player_penalty = f64::from(self.playing_players);
        let cpu_penalty = self.cpu.system_load.powi(10) * 100.0 * f64::from(self.cpu.cores);

        let (deficit_frame_penalty, nulled_frame_penalty) = match self.frame_stats {
            Some(frames) => (
                (frames.deficit as f64 / FRAMES_PER_WINDOW) * 600.0,
                (frames.nulled as f64 / FRAMES_PER_WINDOW) * 300.0 * 2.0,
            ),
            None => (0.0, 0.0),
        };

        player_penalty + cpu_penalty + deficit_frame_penalty + nulled_frame_penalty
    }
}
