//! Error taxonomy for validation and repair.
//!
//! Validation errors stop a whole batch before any mutation. Repair errors
//! are scoped to a single run; the batch records them and moves on.

use crate::models::{CheckpointId, MapId, RunId, Ticks};
use thiserror::Error;

/// Rejected input parameters or checkpoint graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("from_cp_id must be positive, got {0}")]
    FromCheckpointNotPositive(CheckpointId),

    #[error("to_cp_id must be positive, got {0}")]
    ToCheckpointNotPositive(CheckpointId),

    #[error("from_cp_id and to_cp_id must be different (both {0})")]
    SameCheckpoint(CheckpointId),

    #[error("ref_time must be a finite number of seconds, got {0}")]
    ReferenceNotFinite(f64),

    #[error("ref_time must be > 0.05 seconds, got {0}")]
    ReferenceTooSmall(f64),

    #[error("ref_time must be <= 3600 seconds (1 hour), got {0}")]
    ReferenceTooLarge(f64),

    #[error("checkpoint(s) not found: {}", .missing.join(", "))]
    CheckpointsNotFound { missing: Vec<String> },

    #[error(
        "checkpoints are on different maps: from_cp {from_cp} on map {from_map}, \
         to_cp {to_cp} on map {to_map}"
    )]
    DifferentMaps {
        from_cp: CheckpointId,
        from_map: MapId,
        to_cp: CheckpointId,
        to_map: MapId,
    },
}

/// Why a single run's repair (or revert) was aborted.
///
/// Every variant except `EmptyCheckpointSet` and `ConnectionLost` is raised
/// after a transaction was opened, and implies that it was rolled back.
#[derive(Error, Debug)]
pub enum RepairError {
    #[error("no checkpoints to update for run {run_id}")]
    EmptyCheckpointSet { run_id: RunId },

    #[error("database connection lost before repairing run {run_id}")]
    ConnectionLost { run_id: RunId },

    #[error("no checkpoint data found for run {run_id} in the target set")]
    NoSegmentData { run_id: RunId },

    #[error("no rows updated for run {run_id}")]
    NoRowsAffected { run_id: RunId },

    #[error("run {run_id}: {affected} rows updated but {expected} were snapshotted")]
    RowCountMismatch {
        run_id: RunId,
        expected: usize,
        affected: usize,
    },

    #[error(
        "post-update verification failed for run {run_id}, cp {checkpoint}: \
         expected {expected:?}, got {actual:?}"
    )]
    VerificationMismatch {
        run_id: RunId,
        checkpoint: CheckpointId,
        expected: Ticks,
        actual: Option<Ticks>,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl RepairError {
    /// True when the failure came from the store rather than from the
    /// repair protocol's own checks.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_) | Self::ConnectionLost { .. })
    }
}
