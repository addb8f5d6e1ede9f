//! Cheat detection
//!
//! Flags finished runs whose recorded time between two checkpoints is below
//! the reference time and computes the deficit to inject. Read-only.

use crate::models::{seconds_to_ticks, CheatCandidate, CheckpointId, MapId, RunId, Ticks};
use crate::store::SqliteLedger;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const UNKNOWN_MAP_NAME: &str = "Unknown";

/// A run that matched the segment filter but cannot be repaired safely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataAnomaly {
    pub run_id: RunId,
    pub map_id: MapId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Detection {
    /// Sorted by fps, then by pre-repair total time
    pub candidates: Vec<CheatCandidate>,
    pub anomalies: Vec<DataAnomaly>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Ticks missing from a `from_time -> to_time` segment, or `None` when the
/// segment is not strictly forward or already meets the reference.
pub fn segment_deficit(from_time: Ticks, to_time: Ticks, reference_ticks: f64) -> Option<Ticks> {
    if to_time <= from_time {
        return None;
    }
    let segment = (to_time - from_time) as f64;
    if segment >= reference_ticks {
        return None;
    }
    let deficit = (reference_ticks - segment).round() as Ticks;
    (deficit > 0).then_some(deficit)
}

/// Find every finished run whose `from_cp -> to_cp` segment is shorter than
/// `reference_seconds`.
pub fn find_cheated_runs(
    ledger: &SqliteLedger,
    from_cp: CheckpointId,
    to_cp: CheckpointId,
    reference_seconds: f64,
) -> Result<Detection> {
    let reference_ticks = seconds_to_ticks(reference_seconds);
    let matches = ledger.candidate_segments(from_cp, to_cp, reference_ticks)?;
    debug!(
        "{} segment(s) {} -> {} under {} ticks",
        matches.len(),
        from_cp,
        to_cp,
        reference_ticks
    );

    let mut map_names: HashMap<MapId, String> = HashMap::new();
    let mut detection = Detection::default();

    for m in matches {
        let Some(deficit_ticks) = segment_deficit(m.from_time, m.to_time, reference_ticks) else {
            debug!(
                "run {}: segment of {} ticks rounds to no deficit",
                m.run_id,
                m.segment_ticks()
            );
            continue;
        };

        let Some(old_total) = ledger.terminal_time(m.run_id, m.map_id)? else {
            let reason = format!(
                "no final checkpoint (isend=1) found for mapid {}; data integrity issue",
                m.map_id
            );
            warn!("Skipping run_id {}: {}", m.run_id, reason);
            detection.anomalies.push(DataAnomaly {
                run_id: m.run_id,
                map_id: m.map_id,
                reason,
            });
            continue;
        };

        let map_name = match map_names.get(&m.map_id) {
            Some(name) => name.clone(),
            None => {
                let name = ledger.map_name(m.map_id).unwrap_or_else(|e| {
                    debug!("map name lookup failed for {}: {}", m.map_id, e);
                    None
                });
                let name = name.unwrap_or_else(|| UNKNOWN_MAP_NAME.to_string());
                map_names.insert(m.map_id, name.clone());
                name
            }
        };

        detection.candidates.push(CheatCandidate {
            run_id: m.run_id,
            player_id: m.player_id,
            player_name: m.player_name.clone(),
            map_id: m.map_id,
            map_name,
            fps: m.fps,
            end_cp_time: m.to_time,
            old_total,
            segment_ticks: m.segment_ticks(),
            deficit_ticks,
        });
    }

    sort_for_review(&mut detection.candidates);
    Ok(detection)
}

/// Group runs by recording rate, then by total time. Ties keep run id order.
pub fn sort_for_review(candidates: &mut [CheatCandidate]) {
    candidates.sort_by_key(|c| (c.fps, c.old_total, c.run_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::sample_ledger;

    #[test]
    fn test_segment_deficit() {
        assert_eq!(segment_deficit(0, 100, 200.0), Some(100));
        assert_eq!(segment_deficit(0, 250, 200.0), None);
        assert_eq!(segment_deficit(0, 200, 200.0), None);
        // not strictly forward
        assert_eq!(segment_deficit(100, 100, 200.0), None);
        assert_eq!(segment_deficit(100, 50, 200.0), None);
        // fractional reference ticks round to the nearest tick
        assert_eq!(segment_deficit(0, 100, 200.6), Some(101));
        assert_eq!(segment_deficit(0, 200, 200.3), None);
    }

    #[test]
    fn test_find_cheated_runs() {
        let ledger = sample_ledger();
        let detection = find_cheated_runs(&ledger, 1, 2, 10.0).unwrap();

        let ids: Vec<_> = detection.candidates.iter().map(|c| c.run_id).collect();
        assert_eq!(ids, vec![100, 102]);

        let first = &detection.candidates[0];
        assert_eq!(first.deficit_ticks, 100);
        assert_eq!(first.old_total, 500);
        assert_eq!(first.new_total(), 600);
        assert_eq!(first.end_cp_time, 100);
        assert_eq!(first.map_name, "mp_oasis");
        assert_eq!(first.segment_seconds(), 5.0);

        let second = &detection.candidates[1];
        assert_eq!(second.deficit_ticks, 160);
        assert_eq!(second.deficit_seconds(), 8.0);
    }

    #[test]
    fn test_missing_terminal_record_is_reported() {
        let ledger = sample_ledger();
        let detection = find_cheated_runs(&ledger, 1, 2, 10.0).unwrap();
        assert_eq!(detection.anomalies.len(), 1);
        assert_eq!(detection.anomalies[0].run_id, 103);
        assert!(detection.anomalies[0].reason.contains("isend=1"));
    }

    #[test]
    fn test_nothing_under_reference() {
        let ledger = sample_ledger();
        let detection = find_cheated_runs(&ledger, 1, 2, 1.0).unwrap();
        assert!(detection.is_empty());
        assert!(detection.anomalies.is_empty());
    }

    #[test]
    fn test_unknown_map_name_falls_back() {
        let ledger = sample_ledger();
        ledger
            .connection()
            .execute("DELETE FROM mapids WHERE mapid = 10", [])
            .unwrap();
        let detection = find_cheated_runs(&ledger, 1, 2, 10.0).unwrap();
        assert!(detection
            .candidates
            .iter()
            .all(|c| c.map_name == UNKNOWN_MAP_NAME));
    }

    #[test]
    fn test_sort_for_review() {
        let ledger = sample_ledger();
        let mut candidates = find_cheated_runs(&ledger, 1, 2, 10.0).unwrap().candidates;
        candidates[0].fps = 333;
        candidates.push(CheatCandidate {
            run_id: 7,
            old_total: 50,
            ..candidates[1].clone()
        });
        sort_for_review(&mut candidates);

        let order: Vec<_> = candidates.iter().map(|c| (c.fps, c.old_total)).collect();
        assert_eq!(order, vec![(250, 50), (250, 400), (333, 500)]);
    }
}
