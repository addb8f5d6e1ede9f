use super::{placeholders, LedgerTx, SCHEMA_SQL};
use crate::graph::CheckpointGraph;
use crate::models::{
    Checkpoint, CheckpointConnection, CheckpointId, MapId, Run, RunId, SegmentMatch, Ticks,
};
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, TransactionBehavior};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Read access to the checkpoint ledger plus the entry point for repair
/// transactions.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Open an existing ledger database. Never creates the file.
    pub fn open(db_path: &str, busy_timeout: Duration) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;

        info!("📂 Checkpoint ledger opened at: {}", db_path);
        Ok(Self { conn })
    }

    /// Create (or reuse) a database and apply the ledger schema.
    pub fn create(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to create database at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize ledger schema")?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Liveness probe
    pub fn check_connection(&self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    /// Look up checkpoints by id. Unknown ids are simply absent from the result.
    pub fn checkpoints(&self, ids: &[CheckpointId]) -> Result<Vec<Checkpoint>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT cp_id, mapid, isend FROM checkpoints WHERE cp_id IN ({}) ORDER BY cp_id",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok(Checkpoint {
                    id: row.get(0)?,
                    map_id: row.get(1)?,
                    is_terminal: row.get::<_, i64>(2)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read checkpoints")?;
        Ok(rows)
    }

    /// Outgoing edges of `cp_id` scoped to `map_id`.
    pub fn children(&self, cp_id: CheckpointId, map_id: MapId) -> Result<Vec<CheckpointId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT child_cp_id FROM checkpoint_connections
             WHERE cp_id = ?1 AND mapid = ?2
             ORDER BY child_cp_id",
        )?;
        let children = stmt
            .query_map(params![cp_id, map_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<CheckpointId>>>()
            .with_context(|| format!("Failed to read connections of cp {}", cp_id))?;
        Ok(children)
    }

    /// Load every connection of a map in one query.
    pub fn load_map_graph(&self, map_id: MapId) -> Result<CheckpointGraph> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cp_id, child_cp_id, mapid FROM checkpoint_connections WHERE mapid = ?1",
        )?;
        let edges = stmt
            .query_map(params![map_id], |row| {
                Ok(CheckpointConnection {
                    from: row.get(0)?,
                    to: row.get(1)?,
                    map_id: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to load connections of map {}", map_id))?;

        debug!("Loaded {} connections for map {}", edges.len(), map_id);
        Ok(CheckpointGraph::from_connections(edges))
    }

    /// All recorded checkpoint times of a run.
    pub fn segment_times(&self, run_id: RunId) -> Result<BTreeMap<CheckpointId, Ticks>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cp_id, time_played FROM checkpoint_statistics
             WHERE run_id = ?1
             ORDER BY time_played",
        )?;
        let times = stmt
            .query_map(params![run_id], |row| {
                Ok((row.get::<_, CheckpointId>(0)?, row.get::<_, Ticks>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<CheckpointId, Ticks>>>()
            .with_context(|| format!("Failed to read checkpoint times of run {}", run_id))?;
        Ok(times)
    }

    /// Recorded time at the map's terminal checkpoint. With several terminal
    /// checkpoints the latest one wins.
    pub fn terminal_time(&self, run_id: RunId, map_id: MapId) -> Result<Option<Ticks>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cs.time_played
             FROM checkpoint_statistics cs
             JOIN checkpoints c ON cs.cp_id = c.cp_id
             WHERE cs.run_id = ?1 AND c.mapid = ?2 AND c.isend = 1
             ORDER BY cs.time_played DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query(params![run_id, map_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(row.get(0)?))
    }

    /// Finished runs whose `from -> to` segment is strictly forward and
    /// shorter than `reference_ticks`.
    pub fn candidate_segments(
        &self,
        from_cp: CheckpointId,
        to_cp: CheckpointId,
        reference_ticks: f64,
    ) -> Result<Vec<SegmentMatch>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT
                 s.run_id,
                 s.time_played,
                 e.time_played,
                 pr.mapid,
                 pr.player_id,
                 pr.playername,
                 pr.fps
             FROM checkpoint_statistics s
             JOIN checkpoint_statistics e ON s.run_id = e.run_id
             JOIN player_runs pr ON s.run_id = pr.run_id
             WHERE s.cp_id = ?1
                 AND e.cp_id = ?2
                 AND e.time_played > s.time_played
                 AND (e.time_played - s.time_played) < ?3
                 AND pr.finished_map = 1
             ORDER BY s.run_id",
        )?;
        let matches = stmt
            .query_map(params![from_cp, to_cp, reference_ticks], |row| {
                Ok(SegmentMatch {
                    run_id: row.get(0)?,
                    from_time: row.get(1)?,
                    to_time: row.get(2)?,
                    map_id: row.get(3)?,
                    player_id: row.get(4)?,
                    player_name: row.get(5)?,
                    fps: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to query candidate segments")?;
        Ok(matches)
    }

    pub fn map_name(&self, map_id: MapId) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT mapname FROM mapids WHERE mapid = ?1")?;
        let mut rows = stmt.query(params![map_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(row.get(0)?))
    }

    pub fn run(&self, run_id: RunId) -> Result<Option<Run>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT run_id, player_id, playername, mapid, finished_map, fps
             FROM player_runs WHERE run_id = ?1",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(Run {
            id: row.get(0)?,
            player_id: row.get(1)?,
            player_name: row.get(2)?,
            map_id: row.get(3)?,
            finished: row.get::<_, i64>(4)? != 0,
            fps: row.get(5)?,
        }))
    }

    /// Open the single repair transaction. The mutable borrow keeps a second
    /// one from being opened while this one is alive.
    pub fn begin_repair(&mut self) -> rusqlite::Result<LedgerTx<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(LedgerTx::new(tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::sample_ledger;

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let result = SqliteLedger::open(path.to_str().unwrap(), Duration::from_millis(100));
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_open_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let path = path.to_str().unwrap();
        SqliteLedger::create(path).unwrap();

        let ledger = SqliteLedger::open(path, Duration::from_millis(100)).unwrap();
        assert!(ledger.check_connection());
        assert!(ledger.checkpoints(&[1]).unwrap().is_empty());
    }

    #[test]
    fn test_checkpoints_lookup() {
        let ledger = sample_ledger();
        let found = ledger.checkpoints(&[4, 1, 99]).unwrap();
        assert_eq!(
            found,
            vec![
                Checkpoint { id: 1, map_id: 10, is_terminal: false },
                Checkpoint { id: 4, map_id: 10, is_terminal: true },
            ]
        );
        assert!(ledger.checkpoints(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_children_are_map_scoped() {
        let ledger = sample_ledger();
        assert_eq!(ledger.children(1, 10).unwrap(), vec![2]);
        assert_eq!(ledger.children(1, 20).unwrap(), vec![7]);
        assert_eq!(ledger.children(2, 10).unwrap(), vec![3, 5]);
        assert!(ledger.children(4, 10).unwrap().is_empty());
    }

    #[test]
    fn test_segment_and_terminal_times() {
        let ledger = sample_ledger();
        let times = ledger.segment_times(100).unwrap();
        assert_eq!(times.len(), 5);
        assert_eq!(times[&2], 100);
        assert_eq!(times[&4], 500);

        assert_eq!(ledger.terminal_time(100, 10).unwrap(), Some(500));
        assert_eq!(ledger.terminal_time(103, 10).unwrap(), None);
        assert_eq!(ledger.terminal_time(100, 20).unwrap(), None);
    }

    #[test]
    fn test_candidate_segments_filters() {
        let ledger = sample_ledger();
        let matches = ledger.candidate_segments(1, 2, 200.0).unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.run_id).collect();
        // 101 too slow, 104 unfinished, 105 runs backwards
        assert_eq!(ids, vec![100, 102, 103]);
        assert_eq!(matches[0].segment_ticks(), 100);
        assert_eq!(matches[1].player_name, "alice");
        assert_eq!(matches[1].fps, 250);
    }

    #[test]
    fn test_map_name_and_run() {
        let ledger = sample_ledger();
        assert_eq!(ledger.map_name(10).unwrap().as_deref(), Some("mp_oasis"));
        assert_eq!(ledger.map_name(99).unwrap(), None);

        let run = ledger.run(104).unwrap().unwrap();
        assert_eq!(run.player_name, "bob");
        assert!(!run.finished);
        assert!(ledger.run(999).unwrap().is_none());
    }
}
