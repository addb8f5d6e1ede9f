use serde::{Deserialize, Serialize};

pub type CheckpointId = i64;
pub type MapId = i64;
pub type RunId = i64;
pub type PlayerId = i64;

/// Recorded elapsed time, 20 ticks per second.
pub type Ticks = i64;

pub const TICKS_PER_SECOND: i64 = 20;

/// Convert a duration in seconds to (possibly fractional) ticks.
pub fn seconds_to_ticks(seconds: f64) -> f64 {
    seconds * TICKS_PER_SECOND as f64
}

pub fn ticks_to_seconds(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Render ticks as `MM:SS.SS`. Minutes are not capped at 59.
pub fn format_ticks(ticks: Ticks) -> String {
    let total_seconds = ticks_to_seconds(ticks);
    let minutes = (total_seconds / 60.0).floor() as i64;
    let seconds = total_seconds - (minutes * 60) as f64;
    format!("{:02}:{:05.2}", minutes, seconds)
}

/// A gameplay waypoint on a map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub map_id: MapId,
    pub is_terminal: bool,
}

/// Directed edge in a map's checkpoint graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointConnection {
    pub from: CheckpointId,
    pub to: CheckpointId,
    pub map_id: MapId,
}

/// A player's attempt at a map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub map_id: MapId,
    pub finished: bool,
    pub fps: i64,
}

/// A run whose recorded segment between two checkpoints is faster than the
/// reference, as returned by the candidate query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMatch {
    pub run_id: RunId,
    pub from_time: Ticks,
    pub to_time: Ticks,
    pub map_id: MapId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub fps: i64,
}

impl SegmentMatch {
    pub fn segment_ticks(&self) -> Ticks {
        self.to_time - self.from_time
    }
}

/// A flagged run together with the deficit needed to lift its segment up to
/// the reference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheatCandidate {
    pub run_id: RunId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub map_id: MapId,
    pub map_name: String,
    pub fps: i64,
    /// Recorded time at the segment's end checkpoint
    pub end_cp_time: Ticks,
    /// Recorded time at the map's terminal checkpoint, before repair
    pub old_total: Ticks,
    pub segment_ticks: Ticks,
    pub deficit_ticks: Ticks,
}

impl CheatCandidate {
    pub fn new_total(&self) -> Ticks {
        self.old_total + self.deficit_ticks
    }

    pub fn segment_seconds(&self) -> f64 {
        ticks_to_seconds(self.segment_ticks)
    }

    pub fn deficit_seconds(&self) -> f64 {
        ticks_to_seconds(self.deficit_ticks)
    }
}
