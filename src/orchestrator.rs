//! Cheat run fixer
//!
//! Sequences validation, detection and repair for one checkpoint segment,
//! and replays audit records backwards for reverts. Runs are processed one
//! at a time; a failed run never stops the rest of the batch.

use crate::audit::AuditRecord;
use crate::detector;
use crate::error::RepairError;
use crate::graph::{self, CheckpointGraph};
use crate::models::{seconds_to_ticks, CheckpointId, MapId};
use crate::repair;
use crate::report::{
    BatchReport, FailureReason, RevertOutcome, RevertReport, RevertStatus, RunMode, RunOutcome,
    RunStatus,
};
use crate::store::SqliteLedger;
use crate::validation::{validate_checkpoints, validate_parameters};
use anyhow::{bail, Result};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Segment to check and its minimum legitimate traversal time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixRequest {
    pub from_cp: CheckpointId,
    pub to_cp: CheckpointId,
    pub reference_seconds: f64,
}

pub struct CheatRunFixer {
    ledger: SqliteLedger,
    graphs: HashMap<MapId, CheckpointGraph>,
}

impl CheatRunFixer {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self {
            ledger,
            graphs: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &SqliteLedger {
        &self.ledger
    }

    pub fn into_ledger(self) -> SqliteLedger {
        self.ledger
    }

    /// Validate, detect and (in live mode) repair every flagged run.
    ///
    /// Validation failures abort before anything is read or written and are
    /// returned as a [`crate::error::ValidationError`] inside the error.
    pub fn run(&mut self, request: &FixRequest, mode: RunMode) -> Result<BatchReport> {
        let FixRequest {
            from_cp,
            to_cp,
            reference_seconds,
        } = *request;

        validate_parameters(from_cp, to_cp, reference_seconds)?;
        let segment = validate_checkpoints(&self.ledger, from_cp, to_cp)?;

        if mode.is_live() && !self.ledger.check_connection() {
            bail!("Database connection lost");
        }

        // Always work from the current graph.
        self.graphs.clear();

        info!(
            "🔍 Analyzing runs from CP {} to CP {} (map {}, reference {}s = {} ticks, mode {:?})",
            from_cp,
            to_cp,
            segment.map_id,
            reference_seconds,
            seconds_to_ticks(reference_seconds),
            mode
        );

        let detection =
            detector::find_cheated_runs(&self.ledger, from_cp, to_cp, reference_seconds)?;
        info!(
            "Found {} cheated run(s), {} skipped as anomalies",
            detection.candidates.len(),
            detection.anomalies.len()
        );

        let mut outcomes = Vec::with_capacity(detection.candidates.len());
        for candidate in detection.candidates {
            let checkpoints = match self.downstream(to_cp, candidate.map_id) {
                Ok(set) => set,
                Err(e) => {
                    warn!(
                        "Failed to load checkpoint graph for run {} (map {}): {:#}",
                        candidate.run_id, candidate.map_id, e
                    );
                    outcomes.push(RunOutcome {
                        candidate,
                        checkpoints: BTreeSet::new(),
                        status: RunStatus::Failed(store_reason(&e)),
                    });
                    continue;
                }
            };

            let status = match mode {
                RunMode::DryRun => RunStatus::Planned,
                RunMode::Live => {
                    match repair::apply(
                        &mut self.ledger,
                        candidate.run_id,
                        &checkpoints,
                        candidate.deficit_ticks,
                    ) {
                        Ok(receipt) => {
                            info!(
                                "✅ run {} (player {}): +{} ticks on {} checkpoint(s)",
                                candidate.run_id,
                                candidate.player_name,
                                candidate.deficit_ticks,
                                receipt.rows_affected
                            );
                            RunStatus::Repaired {
                                rows_affected: receipt.rows_affected,
                            }
                        }
                        Err(e) => {
                            warn!("Failed to update run {}: {}", candidate.run_id, e);
                            RunStatus::Failed(FailureReason::from(&e))
                        }
                    }
                }
            };

            outcomes.push(RunOutcome {
                candidate,
                checkpoints,
                status,
            });
        }

        Ok(BatchReport {
            mode,
            from_cp,
            to_cp,
            reference_seconds,
            map_id: segment.map_id,
            reachable: segment.reachable,
            outcomes,
            anomalies: detection.anomalies,
        })
    }

    /// Undo the repairs described by `records`.
    ///
    /// The checkpoint set is recomputed from the graph for every record; the
    /// set stored in the record is only compared against it.
    pub fn revert(&mut self, records: &[AuditRecord]) -> Result<RevertReport> {
        self.graphs.clear();
        let mut report = RevertReport::default();

        for record in records {
            let outcome = self.revert_one(record);
            match &outcome.status {
                RevertStatus::Reverted { rows_affected } => info!(
                    "✅ Reverted run_id {} (player: {}, -{} ticks, {} checkpoints)",
                    record.run_id,
                    record.player_name,
                    record.adjustment_ticks(),
                    rows_affected
                ),
                RevertStatus::ZeroAdjustment => {
                    info!("run_id {}: zero adjustment, nothing to revert", record.run_id)
                }
                other => warn!("Failed to revert run_id {}: {:?}", record.run_id, other),
            }
            report.outcomes.push(outcome);
        }

        info!(
            "Reverted {}/{} run(s)",
            report.reverted(),
            report.outcomes.len()
        );
        Ok(report)
    }

    fn revert_one(&mut self, record: &AuditRecord) -> RevertOutcome {
        let delta = record.adjustment_ticks();
        let mut outcome = RevertOutcome {
            run_id: record.run_id,
            player_name: record.player_name.clone(),
            delta_ticks: delta,
            checkpoints: BTreeSet::new(),
            status: RevertStatus::EmptyCheckpointSet,
        };

        let run = match self.ledger.run(record.run_id) {
            Ok(Some(run)) => run,
            Ok(None) => {
                outcome.status = RevertStatus::RunMissing;
                return outcome;
            }
            Err(e) => {
                outcome.status = store_failure(&e);
                return outcome;
            }
        };
        if run.map_id != record.map_id {
            outcome.status = RevertStatus::MapMismatch {
                recorded: record.map_id,
                actual: run.map_id,
            };
            return outcome;
        }

        let checkpoints = match self.downstream(record.to_cp, record.map_id) {
            Ok(set) => set,
            Err(e) => {
                outcome.status = store_failure(&e);
                return outcome;
            }
        };
        if !record.checkpoint_ids.is_empty() && record.checkpoint_ids != checkpoints {
            warn!(
                "run {}: checkpoint graph changed since export ({:?} -> {:?}); using current graph",
                record.run_id, record.checkpoint_ids, checkpoints
            );
        }
        outcome.checkpoints = checkpoints;

        if delta == 0 {
            outcome.status = RevertStatus::ZeroAdjustment;
            return outcome;
        }

        let result = repair::revert(&mut self.ledger, record.run_id, &outcome.checkpoints, delta);
        outcome.status = match result {
            Ok(receipt) => RevertStatus::Reverted {
                rows_affected: receipt.rows_affected,
            },
            Err(
                RepairError::EmptyCheckpointSet { .. }
                | RepairError::NoSegmentData { .. }
                | RepairError::NoRowsAffected { .. },
            ) => RevertStatus::EmptyCheckpointSet,
            Err(e) => RevertStatus::Failed(FailureReason::from(&e)),
        };
        outcome
    }

    /// Downstream set of `cp_id`, using one preloaded graph per map.
    fn downstream(
        &mut self,
        cp_id: CheckpointId,
        map_id: MapId,
    ) -> Result<BTreeSet<CheckpointId>> {
        if !self.graphs.contains_key(&map_id) {
            let graph = self.ledger.load_map_graph(map_id)?;
            debug!("map {}: {} connections loaded", map_id, graph.edge_count());
            self.graphs.insert(map_id, graph);
        }
        match self.graphs.get(&map_id) {
            Some(graph) => graph::downstream_set(graph, cp_id, map_id),
            None => bail!("graph for map {} not loaded", map_id),
        }
    }
}

fn store_reason(err: &anyhow::Error) -> FailureReason {
    FailureReason {
        message: format!("{:#}", err),
        store_error: true,
    }
}

fn store_failure(err: &anyhow::Error) -> RevertStatus {
    RevertStatus::Failed(store_reason(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::store::fixtures::sample_ledger;

    fn request(from_cp: CheckpointId, to_cp: CheckpointId, reference_seconds: f64) -> FixRequest {
        FixRequest {
            from_cp,
            to_cp,
            reference_seconds,
        }
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let mut fixer = CheatRunFixer::new(sample_ledger());
        let before = fixer.ledger().segment_times(100).unwrap();

        let report = fixer.run(&request(1, 2, 10.0), RunMode::DryRun).unwrap();
        assert_eq!(report.planned(), 2);
        assert_eq!(report.repaired(), 0);
        assert_eq!(report.map_id, 10);
        assert!(report.reachable);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(
            report.outcomes[0].checkpoints,
            [2, 3, 4, 5].into_iter().collect()
        );

        assert_eq!(fixer.ledger().segment_times(100).unwrap(), before);
    }

    #[test]
    fn test_live_run_repairs_and_is_stable() {
        let mut fixer = CheatRunFixer::new(sample_ledger());
        let report = fixer.run(&request(1, 2, 10.0), RunMode::Live).unwrap();
        assert_eq!(report.repaired(), 2);
        assert_eq!(report.failed(), 0);

        assert_eq!(fixer.ledger().terminal_time(100, 10).unwrap(), Some(600));
        assert_eq!(fixer.ledger().terminal_time(102, 10).unwrap(), Some(560));
        // segment now meets the reference exactly
        let times = fixer.ledger().segment_times(102).unwrap();
        assert_eq!(times[&2] - times[&1], 200);

        let again = fixer.run(&request(1, 2, 10.0), RunMode::Live).unwrap();
        assert!(again.outcomes.is_empty());
    }

    #[test]
    fn test_validation_stops_before_detection() {
        let mut fixer = CheatRunFixer::new(sample_ledger());
        let err = fixer.run(&request(5, 5, 10.0), RunMode::Live).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::SameCheckpoint(5))
        );

        let err = fixer.run(&request(1, 6, 10.0), RunMode::Live).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::DifferentMaps { .. })
        ));
    }

    #[test]
    fn test_failed_run_does_not_stop_batch() {
        let ledger = sample_ledger();
        ledger
            .connection()
            .execute_batch(
                "CREATE TRIGGER perturb_run100 AFTER UPDATE OF time_played ON checkpoint_statistics
                 WHEN NEW.run_id = 100 AND NEW.cp_id = 4
                 BEGIN
                     UPDATE checkpoint_statistics SET time_played = time_played + 1
                     WHERE run_id = NEW.run_id AND cp_id = NEW.cp_id;
                 END;",
            )
            .unwrap();
        let mut fixer = CheatRunFixer::new(ledger);

        let report = fixer.run(&request(1, 2, 10.0), RunMode::Live).unwrap();
        assert_eq!(report.repaired(), 1);
        assert_eq!(report.failed(), 1);
        match &report.outcomes[0].status {
            RunStatus::Failed(reason) => {
                assert!(reason.message.contains("verification failed"));
                assert!(!reason.store_error);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        // rolled back
        assert_eq!(fixer.ledger().terminal_time(100, 10).unwrap(), Some(500));
        assert_eq!(fixer.ledger().terminal_time(102, 10).unwrap(), Some(560));

        // only the successful run is exported
        let audit = report.audit_records();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].run_id, 102);
    }

    #[test]
    fn test_store_error_rolls_back_only_that_run() {
        let ledger = sample_ledger();
        ledger
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_run100 BEFORE UPDATE ON checkpoint_statistics
                 WHEN NEW.run_id = 100
                 BEGIN
                     SELECT RAISE(ABORT, 'boom');
                 END;",
            )
            .unwrap();
        let mut fixer = CheatRunFixer::new(ledger);
        let before = fixer.ledger().segment_times(100).unwrap();

        let report = fixer.run(&request(1, 2, 10.0), RunMode::Live).unwrap();
        assert_eq!(report.outcomes[0].candidate.run_id, 100);
        match &report.outcomes[0].status {
            RunStatus::Failed(reason) => {
                assert!(reason.store_error);
                assert!(reason.message.contains("boom"));
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(report.outcomes[1].candidate.run_id, 102);
        assert_eq!(
            report.outcomes[1].status,
            RunStatus::Repaired { rows_affected: 3 }
        );

        assert_eq!(fixer.ledger().segment_times(100).unwrap(), before);
        assert_eq!(fixer.ledger().terminal_time(102, 10).unwrap(), Some(560));
    }

    #[test]
    fn test_graph_load_failure_keeps_committed_runs_in_report() {
        let ledger = sample_ledger();
        // Run 300 sorts last (fps 999); its map has an unreadable connection row.
        ledger
            .connection()
            .execute_batch(
                "INSERT INTO checkpoints (cp_id, mapid, isend) VALUES (31, 30, 1);
                 INSERT INTO checkpoint_connections (cp_id, child_cp_id, mapid)
                     VALUES (2, 'bad', 30);
                 INSERT INTO player_runs VALUES (300, 4, 'dave', 30, 999, 1);
                 INSERT INTO checkpoint_statistics VALUES
                     (300, 1, 0), (300, 2, 10), (300, 31, 500);",
            )
            .unwrap();
        let mut fixer = CheatRunFixer::new(ledger);

        let report = fixer.run(&request(1, 2, 10.0), RunMode::Live).unwrap();
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.candidate.run_id).collect();
        assert_eq!(ids, vec![100, 102, 300]);
        assert_eq!(report.repaired(), 2);
        assert_eq!(report.failed(), 1);

        let last = &report.outcomes[2];
        assert!(last.checkpoints.is_empty());
        assert!(matches!(
            &last.status,
            RunStatus::Failed(reason) if reason.store_error
        ));
        assert_eq!(fixer.ledger().terminal_time(300, 30).unwrap(), Some(500));

        // committed repairs still reach the audit export
        let audit: Vec<_> = report.audit_records().iter().map(|r| r.run_id).collect();
        assert_eq!(audit, vec![100, 102]);
    }

    #[test]
    fn test_revert_restores_original_times() {
        let mut fixer = CheatRunFixer::new(sample_ledger());
        let original_100 = fixer.ledger().segment_times(100).unwrap();
        let original_102 = fixer.ledger().segment_times(102).unwrap();

        let report = fixer.run(&request(1, 2, 10.0), RunMode::Live).unwrap();
        let revert = fixer.revert(&report.audit_records()).unwrap();
        assert!(revert.is_clean());
        assert_eq!(revert.reverted(), 2);

        assert_eq!(fixer.ledger().segment_times(100).unwrap(), original_100);
        assert_eq!(fixer.ledger().segment_times(102).unwrap(), original_102);
    }

    #[test]
    fn test_revert_outcomes_are_distinguished() {
        let mut fixer = CheatRunFixer::new(sample_ledger());
        let report = fixer.run(&request(1, 2, 10.0), RunMode::DryRun).unwrap();
        let template = report.audit_records()[0].clone();

        let missing_run = AuditRecord {
            run_id: 999,
            ..template.clone()
        };
        let wrong_map = AuditRecord {
            map_id: 20,
            ..template.clone()
        };
        // run 104 has no records downstream of cp 7 on map 10
        let nothing_to_update = AuditRecord {
            run_id: 104,
            to_cp: 7,
            ..template.clone()
        };

        let no_adjustment = AuditRecord {
            new_time: template.old_time,
            ..template.clone()
        };

        let revert = fixer
            .revert(&[missing_run, wrong_map, nothing_to_update, no_adjustment])
            .unwrap();
        let statuses: Vec<_> = revert.outcomes.iter().map(|o| o.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                RevertStatus::RunMissing,
                RevertStatus::MapMismatch {
                    recorded: 20,
                    actual: 10
                },
                RevertStatus::EmptyCheckpointSet,
                RevertStatus::ZeroAdjustment,
            ]
        );
        // a zero adjustment still resolves the graph but writes nothing
        assert_eq!(revert.outcomes[3].checkpoints, [2, 3, 4, 5].into_iter().collect());
        assert_eq!(revert.reverted(), 0);
        assert!(!revert.is_clean());
    }
}
