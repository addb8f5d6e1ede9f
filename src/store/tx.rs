use super::placeholders;
use crate::models::{CheckpointId, RunId, Ticks};
use rusqlite::{params_from_iter, Transaction};
use std::collections::{BTreeMap, BTreeSet};

/// Scoped repair transaction.
///
/// Dropping the handle without calling [`LedgerTx::commit`] rolls the
/// transaction back, so early returns and `?` never leave it open.
pub struct LedgerTx<'a> {
    tx: Transaction<'a>,
}

impl<'a> LedgerTx<'a> {
    pub(super) fn new(tx: Transaction<'a>) -> Self {
        Self { tx }
    }

    /// Elapsed times of `run_id` at the given checkpoints. Checkpoints the
    /// run never reached are absent.
    pub fn snapshot(
        &self,
        run_id: RunId,
        checkpoints: &BTreeSet<CheckpointId>,
    ) -> rusqlite::Result<BTreeMap<CheckpointId, Ticks>> {
        if checkpoints.is_empty() {
            return Ok(BTreeMap::new());
        }

        let sql = format!(
            "SELECT cp_id, time_played FROM checkpoint_statistics
             WHERE run_id = ? AND cp_id IN ({})",
            placeholders(checkpoints.len())
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let params = std::iter::once(run_id).chain(checkpoints.iter().copied());
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((row.get::<_, CheckpointId>(0)?, row.get::<_, Ticks>(1)?))
            })?
            .collect();
        rows
    }

    /// Add `delta` to every record of `run_id` at the given checkpoints and
    /// return the number of rows touched.
    pub fn shift_times(
        &self,
        run_id: RunId,
        checkpoints: &BTreeSet<CheckpointId>,
        delta: Ticks,
    ) -> rusqlite::Result<usize> {
        if checkpoints.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE checkpoint_statistics
             SET time_played = time_played + ?
             WHERE run_id = ? AND cp_id IN ({})",
            placeholders(checkpoints.len())
        );
        let params = [delta, run_id]
            .into_iter()
            .chain(checkpoints.iter().copied());
        self.tx.execute(&sql, params_from_iter(params))
    }

    pub fn commit(self) -> rusqlite::Result<()> {
        self.tx.commit()
    }

    pub fn rollback(self) -> rusqlite::Result<()> {
        self.tx.rollback()
    }
}
