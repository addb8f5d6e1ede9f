//! Batch reports and the affected-player summary.

use crate::audit::AuditRecord;
use crate::detector::DataAnomaly;
use crate::error::RepairError;
use crate::models::{CheatCandidate, CheckpointId, MapId, PlayerId, RunId, Ticks};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Detect and report only
    DryRun,
    /// Detect and commit repairs
    Live,
}

impl RunMode {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// A repair error flattened for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub message: String,
    pub store_error: bool,
}

impl From<&RepairError> for FailureReason {
    fn from(err: &RepairError) -> Self {
        Self {
            message: err.to_string(),
            store_error: err.is_store_error(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Dry run: would be repaired
    Planned,
    Repaired { rows_affected: usize },
    Failed(FailureReason),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub candidate: CheatCandidate,
    pub checkpoints: BTreeSet<CheckpointId>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub mode: RunMode,
    pub from_cp: CheckpointId,
    pub to_cp: CheckpointId,
    pub reference_seconds: f64,
    pub map_id: MapId,
    pub reachable: bool,
    pub outcomes: Vec<RunOutcome>,
    pub anomalies: Vec<DataAnomaly>,
}

impl BatchReport {
    pub fn planned(&self) -> usize {
        self.count(|s| matches!(s, RunStatus::Planned))
    }

    pub fn repaired(&self) -> usize {
        self.count(|s| matches!(s, RunStatus::Repaired { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, RunStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&RunStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    /// Audit rows for every run that was (or in a dry run would be) repaired.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, RunStatus::Failed(_)))
            .map(|o| {
                AuditRecord::from_candidate(&o.candidate, self.from_cp, self.to_cp, &o.checkpoints)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevertStatus {
    Reverted { rows_affected: usize },
    /// The graph yields nothing to update for this record
    EmptyCheckpointSet,
    /// The record carries no adjustment; nothing was written
    ZeroAdjustment,
    RunMissing,
    MapMismatch { recorded: MapId, actual: MapId },
    Failed(FailureReason),
}

#[derive(Debug, Clone, Serialize)]
pub struct RevertOutcome {
    pub run_id: RunId,
    pub player_name: String,
    pub delta_ticks: Ticks,
    pub checkpoints: BTreeSet<CheckpointId>,
    pub status: RevertStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RevertReport {
    pub outcomes: Vec<RevertOutcome>,
}

impl RevertReport {
    pub fn reverted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RevertStatus::Reverted { .. }))
            .count()
    }

    /// True when every record was reverted or had nothing to undo.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| {
            matches!(
                o.status,
                RevertStatus::Reverted { .. } | RevertStatus::ZeroAdjustment
            )
        })
    }
}

/// Repaired runs of one player, counted per recording rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSummary {
    pub player_id: PlayerId,
    pub player_name: String,
    pub runs_by_fps: BTreeMap<i64, usize>,
}

impl fmt::Display for PlayerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .runs_by_fps
            .iter()
            .map(|(fps, runs)| format!("fps:{}, runs:{}", fps, runs))
            .collect();
        write!(f, "{}(id:{}, {})", self.player_name, self.player_id, parts.join(", "))
    }
}

/// Fold audit records into per-player counts, ordered by player id.
pub fn summarize_players(records: &[AuditRecord]) -> Vec<PlayerSummary> {
    let mut players: BTreeMap<PlayerId, PlayerSummary> = BTreeMap::new();
    for r in records {
        let entry = players.entry(r.player_id).or_insert_with(|| PlayerSummary {
            player_id: r.player_id,
            player_name: r.player_name.clone(),
            runs_by_fps: BTreeMap::new(),
        });
        // Latest name wins, matching the export order.
        entry.player_name = r.player_name.clone();
        *entry.runs_by_fps.entry(r.fps).or_default() += 1;
    }
    players.into_values().collect()
}
