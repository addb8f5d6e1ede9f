//! Audit CSV
//!
//! Every applied (or previewed) repair is exported as one CSV row. The file
//! doubles as the input for reverting a batch.

use crate::models::{
    format_ticks, ticks_to_seconds, CheatCandidate, CheckpointId, MapId, PlayerId, RunId, Ticks,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const COLUMNS: [&str; 15] = [
    "run_id",
    "player_id",
    "player_name",
    "mapid",
    "map_name",
    "fps",
    "from_cp_id",
    "to_cp_id",
    "checkpoint_ids",
    "old_time_played",
    "old_time_formatted",
    "new_time_played",
    "new_time_formatted",
    "adjustment_ticks",
    "adjustment_seconds",
];

/// One repaired run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: RunId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub map_id: MapId,
    pub map_name: String,
    pub fps: i64,
    pub from_cp: CheckpointId,
    pub to_cp: CheckpointId,
    pub checkpoint_ids: BTreeSet<CheckpointId>,
    pub old_time: Ticks,
    pub new_time: Ticks,
}

impl AuditRecord {
    pub fn from_candidate(
        candidate: &CheatCandidate,
        from_cp: CheckpointId,
        to_cp: CheckpointId,
        checkpoint_ids: &BTreeSet<CheckpointId>,
    ) -> Self {
        Self {
            run_id: candidate.run_id,
            player_id: candidate.player_id,
            player_name: candidate.player_name.clone(),
            map_id: candidate.map_id,
            map_name: candidate.map_name.clone(),
            fps: candidate.fps,
            from_cp,
            to_cp,
            checkpoint_ids: checkpoint_ids.clone(),
            old_time: candidate.old_total,
            new_time: candidate.new_total(),
        }
    }

    pub fn adjustment_ticks(&self) -> Ticks {
        self.new_time - self.old_time
    }

    pub fn adjustment_seconds(&self) -> f64 {
        ticks_to_seconds(self.adjustment_ticks())
    }
}

/// `cheated_runs_<kind>_<YYYYmmdd_HHMMSS>.csv` inside `dir`.
pub fn export_path(dir: &Path, kind: &str, at: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "cheated_runs_{}_{}.csv",
        kind,
        at.format("%Y%m%d_%H%M%S")
    ))
}

/// Write records as CSV
pub fn write_csv<W: Write>(writer: &mut W, records: &[AuditRecord]) -> std::io::Result<()> {
    writeln!(writer, "{}", COLUMNS.join(","))?;

    for r in records {
        let checkpoint_ids = r
            .checkpoint_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(";");
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{:.2}",
            r.run_id,
            r.player_id,
            quote(&r.player_name),
            r.map_id,
            quote(&r.map_name),
            r.fps,
            r.from_cp,
            r.to_cp,
            checkpoint_ids,
            r.old_time,
            format_ticks(r.old_time),
            r.new_time,
            format_ticks(r.new_time),
            r.adjustment_ticks(),
            r.adjustment_seconds(),
        )?;
    }

    Ok(())
}

pub fn save_csv(path: &Path, records: &[AuditRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_csv(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

/// Parse records written by [`write_csv`]. Columns are matched by header
/// name; `checkpoint_ids` is optional so older exports still load.
pub fn read_csv<R: BufRead>(reader: R) -> Result<Vec<AuditRecord>> {
    let mut lines = reader.lines().enumerate();

    let header = match lines.next() {
        Some((_, line)) => line.context("Failed to read CSV header")?,
        None => bail!("CSV file is empty"),
    };
    let header = split_line(header.trim_end_matches('\r'))
        .map_err(|e| anyhow::anyhow!("line 1: {}", e))?;
    let columns = ColumnIndex::new(&header)?;

    let mut records = Vec::new();
    // A quoted field may span physical lines; `pending` holds the record so far.
    let mut pending = String::new();
    let mut start_line = 0;
    for (idx, line) in lines {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        let line = line.trim_end_matches('\r');
        if pending.is_empty() {
            if line.trim().is_empty() {
                continue;
            }
            start_line = line_no;
        } else {
            pending.push('\n');
        }
        pending.push_str(line);

        if pending.matches('"').count() % 2 == 1 {
            continue;
        }

        let fields =
            split_line(&pending).map_err(|e| anyhow::anyhow!("line {}: {}", start_line, e))?;
        let record = columns
            .record(&fields)
            .with_context(|| format!("Malformed audit record on line {}", start_line))?;
        records.push(record);
        pending.clear();
    }

    if !pending.is_empty() {
        bail!("line {}: unterminated quoted field", start_line);
    }

    Ok(records)
}

pub fn load_csv(path: &Path) -> Result<Vec<AuditRecord>> {
    let file = File::open(path).with_context(|| format!("File '{}' not found", path.display()))?;
    read_csv(BufReader::new(file))
}

struct ColumnIndex {
    run_id: usize,
    player_id: usize,
    player_name: usize,
    map_id: usize,
    map_name: usize,
    fps: usize,
    from_cp: usize,
    to_cp: usize,
    checkpoint_ids: Option<usize>,
    old_time: usize,
    new_time: usize,
}

impl ColumnIndex {
    fn new(header: &[String]) -> Result<Self> {
        let find = |name: &str| header.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).with_context(|| format!("CSV header is missing column '{}'", name))
        };
        Ok(Self {
            run_id: require("run_id")?,
            player_id: require("player_id")?,
            player_name: require("player_name")?,
            map_id: require("mapid")?,
            map_name: require("map_name")?,
            fps: require("fps")?,
            from_cp: require("from_cp_id")?,
            to_cp: require("to_cp_id")?,
            checkpoint_ids: find("checkpoint_ids"),
            old_time: require("old_time_played")?,
            new_time: require("new_time_played")?,
        })
    }

    fn record(&self, fields: &[String]) -> Result<AuditRecord> {
        let text = |idx: usize| field(fields, idx);
        let int = |idx: usize, name: &str| -> Result<i64> {
            let raw = field(fields, idx)?.trim();
            raw.parse()
                .with_context(|| format!("{} is not an integer: '{}'", name, raw))
        };

        let checkpoint_ids = match self.checkpoint_ids {
            Some(idx) => text(idx)?
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse()
                        .with_context(|| format!("checkpoint_ids entry is not an integer: '{}'", s))
                })
                .collect::<Result<BTreeSet<CheckpointId>>>()?,
            None => BTreeSet::new(),
        };

        Ok(AuditRecord {
            run_id: int(self.run_id, "run_id")?,
            player_id: int(self.player_id, "player_id")?,
            player_name: text(self.player_name)?.to_string(),
            map_id: int(self.map_id, "mapid")?,
            map_name: text(self.map_name)?.to_string(),
            fps: int(self.fps, "fps")?,
            from_cp: int(self.from_cp, "from_cp_id")?,
            to_cp: int(self.to_cp, "to_cp_id")?,
            checkpoint_ids,
            old_time: int(self.old_time, "old_time_played")?,
            new_time: int(self.new_time, "new_time_played")?,
        })
    }
}

fn field(fields: &[String], idx: usize) -> Result<&str> {
    fields
        .get(idx)
        .map(|s| s.as_str())
        .with_context(|| format!("missing field {}", idx + 1))
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn split_line(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(current);
    Ok(fields)
}
