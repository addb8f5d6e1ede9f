//! Checkpoint ledger storage
//!
//! SQLite-backed access to the checkpoint graph, runs and per-checkpoint
//! elapsed times. Reads go through [`SqliteLedger`]; the only mutation path
//! is a [`LedgerTx`], which rolls back unless explicitly committed.

mod ledger;
mod tx;

pub use ledger::SqliteLedger;
pub use tx::LedgerTx;

/// Table layout of the gameplay-recording database.
///
/// Applied with `CREATE ... IF NOT EXISTS` only when a ledger is created
/// from scratch (fixtures, local copies).
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS mapids (
    mapid INTEGER PRIMARY KEY,
    mapname TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    cp_id INTEGER PRIMARY KEY,
    mapid INTEGER NOT NULL,
    isend INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_map_end
    ON checkpoints(mapid, isend);

CREATE TABLE IF NOT EXISTS checkpoint_connections (
    cp_id INTEGER NOT NULL,
    child_cp_id INTEGER NOT NULL,
    mapid INTEGER NOT NULL,
    PRIMARY KEY (cp_id, child_cp_id, mapid)
);

CREATE TABLE IF NOT EXISTS player_runs (
    run_id INTEGER PRIMARY KEY,
    player_id INTEGER NOT NULL,
    playername TEXT NOT NULL,
    mapid INTEGER NOT NULL,
    fps INTEGER NOT NULL,
    finished_map INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS checkpoint_statistics (
    run_id INTEGER NOT NULL,
    cp_id INTEGER NOT NULL,
    time_played INTEGER NOT NULL,
    PRIMARY KEY (run_id, cp_id)
);

CREATE INDEX IF NOT EXISTS idx_checkpoint_statistics_cp
    ON checkpoint_statistics(cp_id, run_id);
"#;

/// `?,?,?` for an `IN (...)` list of `n` parameters.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
