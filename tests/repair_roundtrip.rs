//! Integration test for the fix -> export -> revert flow
//!
//! Builds a file-backed ledger in a temp directory, repairs a cheated
//! segment, exports the audit CSV, reopens the database and reverts from the
//! CSV alone.

use checkpoint_repair::audit;
use checkpoint_repair::report::{RevertStatus, RunMode, RunStatus};
use checkpoint_repair::{CheatRunFixer, FixRequest, SqliteLedger, ValidationError};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Branching map with a shortcut-prone segment 21 -> 22.
///
/// 20 -> 21 -> 22 -> 23 -> 25 (end)
///             22 -> 24 -> 25
///             24 -> 22 (loop back)
fn create_fixture(path: &Path) {
    let ledger = SqliteLedger::create(path.to_str().unwrap()).expect("Failed to create ledger");
    ledger
        .connection()
        .execute_batch(
            r#"
            INSERT INTO mapids (mapid, mapname) VALUES (3, 'mp_toujane');

            INSERT INTO checkpoints (cp_id, mapid, isend) VALUES
                (20, 3, 0), (21, 3, 0), (22, 3, 0), (23, 3, 0), (24, 3, 0), (25, 3, 1);

            INSERT INTO checkpoint_connections (cp_id, child_cp_id, mapid) VALUES
                (20, 21, 3), (21, 22, 3), (22, 23, 3), (23, 25, 3),
                (22, 24, 3), (24, 25, 3), (24, 22, 3);

            INSERT INTO player_runs (run_id, player_id, playername, mapid, fps, finished_map) VALUES
                (1, 11, 'slider, the', 3, 333, 1),
                (2, 12, 'honest', 3, 125, 1),
                (3, 11, 'slider, the', 3, 125, 1);

            INSERT INTO checkpoint_statistics (run_id, cp_id, time_played) VALUES
                (1, 20, 0), (1, 21, 40), (1, 22, 60), (1, 23, 120), (1, 25, 180),
                (2, 20, 0), (2, 21, 40), (2, 22, 140), (2, 23, 200), (2, 25, 260),
                (3, 20, 0), (3, 21, 30), (3, 22, 35), (3, 24, 90), (3, 25, 150);
            "#,
        )
        .expect("Failed to seed ledger");
}

fn open(path: &Path) -> SqliteLedger {
    SqliteLedger::open(path.to_str().unwrap(), Duration::from_secs(1)).expect("Failed to open")
}

fn snapshot(ledger: &SqliteLedger) -> BTreeMap<i64, BTreeMap<i64, i64>> {
    (1..=3)
        .map(|run| (run, ledger.segment_times(run).unwrap()))
        .collect()
}

#[test]
fn test_fix_export_and_revert_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stats.db");
    create_fixture(&db_path);

    let original = snapshot(&open(&db_path));
    let request = FixRequest {
        from_cp: 21,
        to_cp: 22,
        reference_seconds: 4.0,
    };

    // Repair
    let mut fixer = CheatRunFixer::new(open(&db_path));
    let report = fixer.run(&request, RunMode::Live).unwrap();

    // run 1: 20 ticks (deficit 60), run 3: 5 ticks (deficit 75); run 2 is clean
    let flagged: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| (o.candidate.run_id, o.candidate.deficit_ticks))
        .collect();
    assert_eq!(flagged, vec![(3, 75), (1, 60)]);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o.status, RunStatus::Repaired { .. })));

    let repaired = snapshot(fixer.ledger());
    assert_eq!(repaired[&1][&21], 40);
    assert_eq!(repaired[&1][&22], 120);
    assert_eq!(repaired[&1][&23], 180);
    assert_eq!(repaired[&1][&25], 240);
    assert_eq!(repaired[&3][&24], 165);
    assert_eq!(repaired[&2], original[&2]);

    // Recorded order is preserved after the shift
    for run in [1, 3] {
        let times = &repaired[&run];
        assert!(times[&21] <= times[&22]);
        assert!(times[&22] <= times[&25]);
    }

    // Export
    let csv_path = dir.path().join("audit").join("fixed.csv");
    audit::save_csv(&csv_path, &report.audit_records()).unwrap();
    drop(fixer);

    // Revert with a fresh connection, from the CSV alone
    let records = audit::load_csv(&csv_path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].player_name, "slider, the");

    let mut fixer = CheatRunFixer::new(open(&db_path));
    let revert = fixer.revert(&records).unwrap();
    assert!(revert.is_clean());
    assert!(revert
        .outcomes
        .iter()
        .all(|o| matches!(o.status, RevertStatus::Reverted { .. })));

    assert_eq!(snapshot(fixer.ledger()), original);
}

#[test]
fn test_dry_run_then_validation_failure_leave_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stats.db");
    create_fixture(&db_path);
    let original = snapshot(&open(&db_path));

    let mut fixer = CheatRunFixer::new(open(&db_path));
    let report = fixer
        .run(
            &FixRequest {
                from_cp: 21,
                to_cp: 22,
                reference_seconds: 4.0,
            },
            RunMode::DryRun,
        )
        .unwrap();
    assert_eq!(report.planned(), 2);

    let err = fixer
        .run(
            &FixRequest {
                from_cp: 21,
                to_cp: 22,
                reference_seconds: 0.05,
            },
            RunMode::Live,
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ValidationError>(),
        Some(ValidationError::ReferenceTooSmall(_))
    ));

    drop(fixer);
    assert_eq!(snapshot(&open(&db_path)), original);
}
