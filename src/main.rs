//! Cheated Run Fixer CLI
//!
//! Finds runs that beat the minimum legitimate time between two checkpoints
//! and adds the missing time to every checkpoint after the segment.
//!
//! Usage:
//!   fix-cheated-runs --db stats.db fix 12 13 4.5
//!   fix-cheated-runs --db stats.db fix            (prompts for parameters)
//!   fix-cheated-runs --db stats.db revert cheated_runs_fixed_20260101_120000.csv
//!
//! Every `fix` starts with a dry run; changes are only committed after
//! confirmation (or `--yes`). Live runs always write an audit CSV that
//! `revert` accepts.

use anyhow::{bail, Context, Result};
use checkpoint_repair::audit::{self, AuditRecord};
use checkpoint_repair::config::{FixerConfig, CONFIG_PATH_ENV, DB_PATH_ENV};
use checkpoint_repair::models::{format_ticks, seconds_to_ticks, ticks_to_seconds};
use checkpoint_repair::report::{
    summarize_players, BatchReport, RevertReport, RevertStatus, RunMode, RunStatus,
};
use checkpoint_repair::{CheatRunFixer, FixRequest, SqliteLedger, ValidationError};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fix-cheated-runs")]
#[command(about = "Detect and repair runs that skipped part of a checkpoint segment")]
struct Args {
    /// Path to the SQLite checkpoint database
    #[arg(long, env = DB_PATH_ENV)]
    db: Option<String>,

    /// TOML config file
    #[arg(long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Directory for audit CSV files
    #[arg(long)]
    export_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find runs faster than the reference time and add the missing time
    Fix {
        /// Segment start checkpoint
        from_cp: Option<i64>,

        /// Segment end checkpoint
        to_cp: Option<i64>,

        /// Minimum legitimate segment time in seconds
        ref_time: Option<f64>,

        /// Only report what would change
        #[arg(long)]
        dry_run: bool,

        /// Apply without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,

        /// Export the dry-run preview as CSV
        #[arg(long)]
        preview_csv: bool,

        /// Print batch reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Undo the changes listed in an audit CSV
    Revert {
        csv: PathBuf,

        /// Revert without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

/// Validation failed, nothing found, or cancelled
const EXIT_REJECTED: u8 = 1;
/// At least one run could not be repaired or reverted
const EXIT_PARTIAL: u8 = 2;

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "checkpoint_repair=info,fix_cheated_runs=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ Error: {:#}", e);
            ExitCode::from(EXIT_REJECTED)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let mut config = FixerConfig::from_env(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.database.path = db;
    }
    if let Some(dir) = args.export_dir {
        config.export.dir = dir;
    }

    println!("{}", "=".repeat(80));
    println!("Cheated Run Fixer");
    println!("{}", "=".repeat(80));
    println!("Database: {}", config.database.path);

    match args.command {
        Commands::Fix {
            from_cp,
            to_cp,
            ref_time,
            dry_run,
            yes,
            preview_csv,
            json,
        } => {
            let request = FixRequest {
                from_cp: arg_or_prompt(from_cp, "From checkpoint ID: ")?,
                to_cp: arg_or_prompt(to_cp, "To checkpoint ID: ")?,
                reference_seconds: arg_or_prompt(ref_time, "Reference time (seconds): ")?,
            };
            let options = FixOptions {
                dry_run,
                yes,
                preview_csv,
                json,
            };
            fix(&config, &request, &options)
        }
        Commands::Revert { csv, yes } => revert(&config, &csv, yes),
    }
}

struct FixOptions {
    dry_run: bool,
    yes: bool,
    preview_csv: bool,
    json: bool,
}

fn open_ledger(config: &FixerConfig) -> Result<SqliteLedger> {
    SqliteLedger::open(
        &config.database.path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )
}

fn fix(config: &FixerConfig, request: &FixRequest, options: &FixOptions) -> Result<ExitCode> {
    let mut fixer = CheatRunFixer::new(open_ledger(config)?);

    println!();
    println!("{}", "=".repeat(80));
    println!("STEP 1: Dry Run (Analysis Only)");
    println!("{}", "=".repeat(80));

    let preview = match run_batch(&mut fixer, request, RunMode::DryRun)? {
        Some(report) => report,
        None => return Ok(ExitCode::from(EXIT_REJECTED)),
    };
    print_report(&preview, options.json)?;

    if preview.outcomes.is_empty() {
        println!("\nNo cheated runs found!");
        return Ok(ExitCode::from(EXIT_REJECTED));
    }

    if options.preview_csv {
        export(&config.export.dir, "preview", &preview.audit_records())?;
    }

    if options.dry_run {
        println!("\nDry run only. No changes applied.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("\n{}", "=".repeat(80));
    if !options.yes && !confirm("Do you want to apply these changes? (yes/no): ")? {
        println!("\nChanges not applied. Exiting.");
        return Ok(ExitCode::from(EXIT_REJECTED));
    }

    println!("\n{}", "=".repeat(80));
    println!("STEP 2: Applying Changes");
    println!("{}", "=".repeat(80));

    let live = match run_batch(&mut fixer, request, RunMode::Live)? {
        Some(report) => report,
        None => return Ok(ExitCode::from(EXIT_REJECTED)),
    };
    print_report(&live, options.json)?;

    let records = live.audit_records();
    if !records.is_empty() {
        export(&config.export.dir, "fixed", &records)?;
    }

    if live.failed() > 0 {
        println!(
            "\n✗ {} of {} run(s) failed to update",
            live.failed(),
            live.outcomes.len()
        );
        return Ok(ExitCode::from(EXIT_PARTIAL));
    }

    println!("\n✓ All changes applied successfully!");
    Ok(ExitCode::SUCCESS)
}

/// Run one batch, turning validation failures into a printed message.
fn run_batch(
    fixer: &mut CheatRunFixer,
    request: &FixRequest,
    mode: RunMode,
) -> Result<Option<BatchReport>> {
    match fixer.run(request, mode) {
        Ok(report) => Ok(Some(report)),
        Err(e) => match e.downcast_ref::<ValidationError>() {
            Some(validation) => {
                println!("✗ Validation error: {}", validation);
                Ok(None)
            }
            None => Err(e),
        },
    }
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "\nAnalyzing runs from CP {} to CP {} (map ID: {}, reachable: {})",
        report.from_cp, report.to_cp, report.map_id, report.reachable
    );
    println!(
        "Reference time: {} seconds ({} ticks)",
        report.reference_seconds,
        seconds_to_ticks(report.reference_seconds)
    );
    println!(
        "Mode: {}",
        match report.mode {
            RunMode::DryRun => "DRY RUN (no changes will be made)",
            RunMode::Live => "LIVE (changes will be committed)",
        }
    );
    println!("{}", "-".repeat(80));

    if !report.reachable {
        println!(
            "Warning: end_cp {} is not reachable from start_cp {}. This may indicate a data issue.",
            report.to_cp, report.from_cp
        );
    }
    for anomaly in &report.anomalies {
        println!("Warning: Skipping run_id {}: {}", anomaly.run_id, anomaly.reason);
    }

    if report.outcomes.is_empty() {
        return Ok(());
    }

    println!("\nFound {} cheated run(s):\n", report.outcomes.len());
    for (i, outcome) in report.outcomes.iter().enumerate() {
        let c = &outcome.candidate;
        println!("{}. Run ID: {}", i + 1, c.run_id);
        println!("   Player: {} (ID: {})", c.player_name, c.player_id);
        println!("   Map: {} (ID: {})", c.map_name, c.map_id);
        println!("   FPS: {}", c.fps);
        println!("   Segment time: {:.2}s", c.segment_seconds());
        println!("   Old time: {}", format_ticks(c.old_total));
        println!(
            "   Adjustment: +{:.2}s ({} ticks)",
            c.deficit_seconds(),
            c.deficit_ticks
        );
        println!("   Checkpoints to update: {}", outcome.checkpoints.len());
        match &outcome.status {
            RunStatus::Planned => {
                println!("   New time (would be): {}", format_ticks(c.new_total()));
                println!("   (DRY RUN - no changes made)");
            }
            RunStatus::Repaired { rows_affected } => {
                println!("   New time: {}", format_ticks(c.new_total()));
                println!("   ✓ Successfully updated ({} rows)", rows_affected);
            }
            RunStatus::Failed(reason) => {
                println!("   ✗ Failed to update: {}", reason.message);
            }
        }
        println!();
    }

    Ok(())
}

fn export(dir: &Path, kind: &str, records: &[AuditRecord]) -> Result<()> {
    let path = audit::export_path(dir, kind, Local::now());
    audit::save_csv(&path, records)?;
    println!("\n✓ Data exported to: {}", path.display());
    info!("📝 Exported {} audit record(s) to {}", records.len(), path.display());

    println!("\n{}", "=".repeat(80));
    println!("AFFECTED PLAYERS SUMMARY");
    println!("{}", "=".repeat(80));
    for player in summarize_players(records) {
        println!("{}", player);
    }
    Ok(())
}

fn revert(config: &FixerConfig, csv: &Path, yes: bool) -> Result<ExitCode> {
    let records = audit::load_csv(csv)?;
    if records.is_empty() {
        bail!("No data found in CSV file '{}'", csv.display());
    }

    println!("\nFound {} run(s) to revert", records.len());
    println!("{}", "=".repeat(80));

    let question = format!(
        "\nAre you sure you want to revert changes from '{}'? (yes/no): ",
        csv.display()
    );
    if !yes && !confirm(&question)? {
        println!("Revert cancelled.");
        return Ok(ExitCode::from(EXIT_REJECTED));
    }

    let mut fixer = CheatRunFixer::new(open_ledger(config)?);
    let report = fixer.revert(&records)?;
    print_revert(&report);

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}

fn print_revert(report: &RevertReport) {
    for o in &report.outcomes {
        match &o.status {
            RevertStatus::Reverted { rows_affected } => println!(
                "✓ Reverted run_id {} (player: {}, -{:.2}s, {} checkpoints)",
                o.run_id,
                o.player_name,
                ticks_to_seconds(o.delta_ticks),
                rows_affected
            ),
            RevertStatus::EmptyCheckpointSet => {
                println!("✗ No checkpoints found for run_id {}", o.run_id)
            }
            RevertStatus::ZeroAdjustment => {
                println!("- run_id {} has no adjustment, skipped", o.run_id)
            }
            RevertStatus::RunMissing => println!("✗ run_id {} does not exist", o.run_id),
            RevertStatus::MapMismatch { recorded, actual } => println!(
                "✗ run_id {} is on map {}, CSV says map {}",
                o.run_id, actual, recorded
            ),
            RevertStatus::Failed(reason) => {
                println!("✗ Failed to revert run_id {}: {}", o.run_id, reason.message)
            }
        }
    }
    println!(
        "\n✓ Successfully reverted {}/{} run(s)",
        report.reverted(),
        report.outcomes.len()
    );
}

fn arg_or_prompt<T>(value: Option<T>, question: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = value {
        return Ok(v);
    }
    let answer = prompt(question)?;
    answer
        .parse()
        .with_context(|| format!("Invalid input: '{}'", answer))
}

fn confirm(question: &str) -> Result<bool> {
    Ok(prompt(question)?.eq_ignore_ascii_case("yes"))
}

fn prompt(question: &str) -> Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}
