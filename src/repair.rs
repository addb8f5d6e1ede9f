//! Repair transactions
//!
//! Shifts a run's recorded times at a set of checkpoints by a fixed number
//! of ticks, inside one transaction:
//!
//! 1. snapshot the current times (pre-image)
//! 2. apply the shift
//! 3. re-read and check `post == pre + delta` for every checkpoint
//! 4. commit
//!
//! Any failed check or store error rolls the whole transaction back.
//! `revert` is the same protocol with the delta negated.

use crate::error::RepairError;
use crate::models::{CheckpointId, RunId, Ticks};
use crate::store::SqliteLedger;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// What a committed repair changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReceipt {
    pub run_id: RunId,
    pub delta_ticks: Ticks,
    pub rows_affected: usize,
    pub before: BTreeMap<CheckpointId, Ticks>,
    pub after: BTreeMap<CheckpointId, Ticks>,
}

/// Add `deficit_ticks` to `run_id`'s times at every checkpoint in `checkpoints`.
pub fn apply(
    ledger: &mut SqliteLedger,
    run_id: RunId,
    checkpoints: &BTreeSet<CheckpointId>,
    deficit_ticks: Ticks,
) -> Result<RepairReceipt, RepairError> {
    shift(ledger, run_id, checkpoints, deficit_ticks)
}

/// Undo an earlier [`apply`] of `deficit_ticks` to the same checkpoints.
pub fn revert(
    ledger: &mut SqliteLedger,
    run_id: RunId,
    checkpoints: &BTreeSet<CheckpointId>,
    deficit_ticks: Ticks,
) -> Result<RepairReceipt, RepairError> {
    shift(ledger, run_id, checkpoints, -deficit_ticks)
}

fn shift(
    ledger: &mut SqliteLedger,
    run_id: RunId,
    checkpoints: &BTreeSet<CheckpointId>,
    delta: Ticks,
) -> Result<RepairReceipt, RepairError> {
    if checkpoints.is_empty() {
        return Err(RepairError::EmptyCheckpointSet { run_id });
    }
    if !ledger.check_connection() {
        return Err(RepairError::ConnectionLost { run_id });
    }

    let tx = ledger.begin_repair()?;

    let before = tx.snapshot(run_id, checkpoints)?;
    if before.is_empty() {
        tx.rollback()?;
        return Err(RepairError::NoSegmentData { run_id });
    }

    let rows_affected = tx.shift_times(run_id, checkpoints, delta)?;
    if rows_affected == 0 {
        warn!("No rows updated for run {}", run_id);
        tx.rollback()?;
        return Err(RepairError::NoRowsAffected { run_id });
    }
    if rows_affected != before.len() {
        tx.rollback()?;
        return Err(RepairError::RowCountMismatch {
            run_id,
            expected: before.len(),
            affected: rows_affected,
        });
    }

    let after = tx.snapshot(run_id, checkpoints)?;
    if let Err(mismatch) = verify(run_id, &before, &after, delta) {
        warn!("{}", mismatch);
        tx.rollback()?;
        return Err(mismatch);
    }

    tx.commit()?;
    debug!(
        "run {}: shifted {} checkpoint(s) by {} ticks",
        run_id, rows_affected, delta
    );

    Ok(RepairReceipt {
        run_id,
        delta_ticks: delta,
        rows_affected,
        before,
        after,
    })
}

/// Every pre-image checkpoint must be present afterwards and moved by
/// exactly `delta`.
fn verify(
    run_id: RunId,
    before: &BTreeMap<CheckpointId, Ticks>,
    after: &BTreeMap<CheckpointId, Ticks>,
    delta: Ticks,
) -> Result<(), RepairError> {
    for (&checkpoint, &old) in before {
        let expected = old + delta;
        let actual = after.get(&checkpoint).copied();
        if actual != Some(expected) {
            return Err(RepairError::VerificationMismatch {
                run_id,
                checkpoint,
                expected,
                actual,
            });
        }
    }
    if let Some((&checkpoint, &actual)) = after.iter().find(|(cp, _)| !before.contains_key(cp)) {
        return Err(RepairError::VerificationMismatch {
            run_id,
            checkpoint,
            expected: actual - delta,
            actual: Some(actual),
        });
    }
    Ok(())
}
