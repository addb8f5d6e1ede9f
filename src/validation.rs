//! Pre-flight checks run before any candidate is detected or repaired.

use crate::error::ValidationError;
use crate::graph::{self, ChildLookup};
use crate::models::{CheckpointId, MapId};
use crate::store::SqliteLedger;
use anyhow::Result;
use tracing::warn;

/// Lower bound on the reference time (exclusive), seconds.
pub const MIN_REFERENCE_SECONDS: f64 = 0.05;
/// Upper bound on the reference time (inclusive), seconds.
pub const MAX_REFERENCE_SECONDS: f64 = 3600.0;

/// Checkpoint pair that passed graph validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedSegment {
    pub from_cp: CheckpointId,
    pub to_cp: CheckpointId,
    pub map_id: MapId,
    /// Whether `to_cp` can be reached from `from_cp`. An unreachable pair is
    /// reported but does not stop the batch.
    pub reachable: bool,
}

/// Reject malformed parameters without touching the store.
pub fn validate_parameters(
    from_cp: CheckpointId,
    to_cp: CheckpointId,
    reference_seconds: f64,
) -> Result<(), ValidationError> {
    if from_cp <= 0 {
        return Err(ValidationError::FromCheckpointNotPositive(from_cp));
    }
    if to_cp <= 0 {
        return Err(ValidationError::ToCheckpointNotPositive(to_cp));
    }
    if from_cp == to_cp {
        return Err(ValidationError::SameCheckpoint(from_cp));
    }
    if !reference_seconds.is_finite() {
        return Err(ValidationError::ReferenceNotFinite(reference_seconds));
    }
    if reference_seconds <= MIN_REFERENCE_SECONDS {
        return Err(ValidationError::ReferenceTooSmall(reference_seconds));
    }
    if reference_seconds > MAX_REFERENCE_SECONDS {
        return Err(ValidationError::ReferenceTooLarge(reference_seconds));
    }
    Ok(())
}

/// Check both checkpoints exist on the same map and whether `to_cp` is
/// reachable from `from_cp`.
///
/// Graph problems come back as a [`ValidationError`] inside the
/// `anyhow::Error`; store failures are passed through unchanged.
pub fn validate_checkpoints(
    ledger: &SqliteLedger,
    from_cp: CheckpointId,
    to_cp: CheckpointId,
) -> Result<ValidatedSegment> {
    let found = ledger.checkpoints(&[from_cp, to_cp])?;
    let from = found.iter().find(|c| c.id == from_cp);
    let to = found.iter().find(|c| c.id == to_cp);

    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        _ => {
            let mut missing = Vec::new();
            if from.is_none() {
                missing.push(format!("from_cp_id {}", from_cp));
            }
            if to.is_none() {
                missing.push(format!("to_cp_id {}", to_cp));
            }
            return Err(ValidationError::CheckpointsNotFound { missing }.into());
        }
    };

    if from.map_id != to.map_id {
        return Err(ValidationError::DifferentMaps {
            from_cp,
            from_map: from.map_id,
            to_cp,
            to_map: to.map_id,
        }
        .into());
    }

    let map_id = from.map_id;
    let reachable = check_reachability(ledger, from_cp, to_cp, map_id)?;

    Ok(ValidatedSegment {
        from_cp,
        to_cp,
        map_id,
        reachable,
    })
}

fn check_reachability<L: ChildLookup + ?Sized>(
    lookup: &L,
    from_cp: CheckpointId,
    to_cp: CheckpointId,
    map_id: MapId,
) -> Result<bool> {
    let reachable = graph::is_reachable(lookup, from_cp, to_cp, map_id)?;
    if !reachable {
        warn!(
            "end_cp {} is not reachable from start_cp {} via checkpoint_connections on map {}; \
             this may indicate a data issue",
            to_cp, from_cp, map_id
        );
    }
    Ok(reachable)
}
