mod anomaly;
mod db;
mod engine;
mod extract;
mod page;
mod record;
mod router;
mod session;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use engine::Disposition;
use page::PageSnapshot;
use router::{ArtifactStore, CrawlOutcome};
use session::{SessionGuard, SessionState};

#[derive(Parser)]
#[command(name = "sos_scraper", about = "Business-registry detail-page extraction engine")]
struct Cli {
    /// SQLite audit index
    #[arg(long, default_value = db::DEFAULT_DB_PATH, global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register captured page snapshots (<dir>/<term>/*.html) into the queue
    Init {
        /// Snapshot directory written by the browser-automation layer
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// Extract, classify and persist all unprocessed snapshots
    Process {
        /// Max snapshots to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Only process snapshots for this search term
        #[arg(short, long)]
        term: Option<String>,
        /// Artifact output directory
        #[arg(short, long, default_value = "data/out")]
        out: PathBuf,
    },
    /// Confirm a blocked term's challenge has been cleared by an operator
    Confirm {
        #[arg(short, long)]
        term: String,
    },
    /// Show queue and outcome statistics
    Stats,
    /// Extracted records table
    Overview {
        /// Filter by processing status (success, partial, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let conn = db::connect(&cli.db)?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Init { dir } => {
            let rows = scan_snapshot_dir(&dir)?;
            let inserted = db::insert_snapshots(&conn, &rows)?;
            println!("Registered {} new snapshots ({} total found)", inserted, rows.len());
            Ok(())
        }
        Commands::Process { limit, term, out } => {
            let pending = db::fetch_unprocessed(&conn, term.as_deref(), limit)?;
            if pending.is_empty() {
                println!("No unprocessed snapshots. Run 'init' first or all pages are done.");
                return Ok(());
            }
            println!("Processing {} snapshots...", pending.len());
            let counts = process_snapshots(&conn, pending, &out)?;
            counts.print();
            Ok(())
        }
        Commands::Confirm { term } => {
            match db::session_state(&conn, &term)?.as_deref() {
                Some("awaiting_intervention") => {
                    db::set_session_state(&conn, &term, SessionState::Resuming.as_str())?;
                    println!("Term '{}' marked resuming; next 'process' run will retry it.", term);
                }
                Some(state) => println!("Term '{}' is {}; nothing to confirm.", term, state),
                None => println!("Term '{}' has no paused session.", term),
            }
            Ok(())
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Snapshots:      {}", s.total_snapshots);
            println!("  processed:    {}", s.processed);
            println!("  pending:      {}", s.pending);
            println!("Records:");
            println!("  success:      {}", s.success);
            println!("  partial:      {}", s.partial);
            println!("  failed:       {}", s.failed);
            println!("Anomalies:");
            println!("  challenge:    {}", s.challenges);
            println!("  empty:        {}", s.empty_results);
            println!("  unrecognized: {}", s.unrecognized);
            Ok(())
        }
        Commands::Overview { status, limit } => {
            let rows = db::fetch_overview(&conn, status.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No records found.");
                return Ok(());
            }
            println!(
                "{:>3} | {:<10} | {:<30} | {:<22} | {:<8} | {:>5} | {:<10}",
                "#", "ID", "Name", "Status", "Result", "Score", "Term"
            );
            println!("{}", "-".repeat(105));
            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<10} | {:<30} | {:<22} | {:<8} | {:>5.2} | {:<10}",
                    i + 1,
                    truncate(&r.business_id, 10),
                    truncate(&r.business_name, 30),
                    truncate(&r.status, 22),
                    r.processing_status,
                    r.completeness,
                    truncate(&r.search_term, 10),
                );
            }
            println!("\n{} records", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Walk `<dir>/<term>/*.html`; bare files directly under `dir` land under the
/// "default" term. File mtime stands in for capture time.
fn scan_snapshot_dir(dir: &Path) -> Result<Vec<(String, String, String)>> {
    let mut rows = Vec::new();
    let mut push_file = |path: &Path, term: &str| {
        if path.extension().and_then(|e| e.to_str()) != Some("html") {
            return;
        }
        let captured_at: DateTime<Utc> = path
            .metadata()
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        rows.push((
            path.display().to_string(),
            term.to_string(),
            captured_at.to_rfc3339(),
        ));
    };

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read snapshot dir {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let term = entry.file_name().to_string_lossy().to_string();
            for sub in std::fs::read_dir(&path)? {
                push_file(&sub?.path(), &term);
            }
        } else {
            push_file(&path, "default");
        }
    }

    rows.sort();
    Ok(rows)
}

struct ProcessCounts {
    success: usize,
    partial: usize,
    failed: usize,
    anomalies: usize,
    suspended: usize,
}

impl ProcessCounts {
    fn print(&self) {
        println!(
            "Saved {} success, {} partial, {} failed records; {} anomalies; {} suspended.",
            self.success, self.partial, self.failed, self.anomalies, self.suspended,
        );
        if self.suspended > 0 {
            println!("Suspended snapshots stay queued; clear the block and run 'confirm'.");
        }
    }
}

struct TermResult {
    term: String,
    final_state: SessionState,
    saves: Vec<db::PageResult>,
    suspended: usize,
}

/// Drain the queue: snapshots grouped by term, terms in parallel, pages
/// within a term strictly sequential so each guard observes visit order.
/// Artifact files are written in the workers; the SQLite audit rows land on
/// the main thread afterwards, one transaction per term.
fn process_snapshots(
    conn: &rusqlite::Connection,
    pending: Vec<db::SnapshotRow>,
    out: &Path,
) -> Result<ProcessCounts> {
    let store = ArtifactStore::open(out)?;

    let mut by_term: BTreeMap<String, Vec<db::SnapshotRow>> = BTreeMap::new();
    for row in pending {
        by_term.entry(row.term.clone()).or_default().push(row);
    }

    // Restore each term's persisted guard state before going parallel.
    let mut groups = Vec::new();
    for (term, rows) in by_term {
        let state = db::session_state(conn, &term)?
            .as_deref()
            .and_then(SessionState::parse)
            .unwrap_or(SessionState::Active);
        groups.push((term, state, rows));
    }

    let total: usize = groups.iter().map(|(_, _, rows)| rows.len()).sum();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")?
            .progress_chars("=> "),
    );

    let term_results: Vec<TermResult> = groups
        .into_par_iter()
        .map(|(term, state, rows)| process_term(&term, state, rows, &store, &pb))
        .collect::<Result<Vec<_>>>()?;

    pb.finish_and_clear();

    let mut counts = ProcessCounts {
        success: 0,
        partial: 0,
        failed: 0,
        anomalies: 0,
        suspended: 0,
    };

    for result in term_results {
        counts.suspended += result.suspended;
        for page in &result.saves {
            match page.outcome.outcome.as_str() {
                "success" => counts.success += 1,
                "partial" => counts.partial += 1,
                "failed" => counts.failed += 1,
                _ => counts.anomalies += 1,
            }
            info!("Processed {} -> {}", page.outcome.source, page.outcome.outcome);
        }
        db::save_term_results(conn, &result.term, result.final_state.as_str(), &result.saves)?;
    }

    Ok(counts)
}

fn process_term(
    term: &str,
    initial_state: SessionState,
    rows: Vec<db::SnapshotRow>,
    store: &ArtifactStore,
    pb: &ProgressBar,
) -> Result<TermResult> {
    let mut guard = SessionGuard::from_state(initial_state);
    let mut saves = Vec::new();
    let mut suspended = 0;

    for row in rows {
        let snapshot = PageSnapshot::from_file(Path::new(&row.path))?;
        let captured_at = DateTime::parse_from_rfc3339(&row.captured_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        match engine::process_page(&snapshot, term, captured_at, &mut guard, store)? {
            Disposition::Suspended => {
                // Stays queued until the operator confirms intervention.
                suspended += 1;
            }
            Disposition::Processed(page) => {
                let label = page.outcome.label().to_string();
                let key = page
                    .artifacts
                    .first()
                    .map(|a| a.correlation_key.clone())
                    .unwrap_or_default();
                let record = match page.outcome {
                    CrawlOutcome::Record(record) => Some((key.clone(), record)),
                    CrawlOutcome::Anomaly(_) => None,
                };
                saves.push(db::PageResult {
                    snapshot_id: row.id,
                    outcome: db::OutcomeRow {
                        correlation_key: key,
                        term: term.to_string(),
                        outcome: label,
                        source: row.path,
                        artifact_count: page.artifacts.len(),
                    },
                    record,
                });
            }
        }
        pb.inc(1);
    }

    if suspended > 0 {
        warn!("Term '{}' paused: {} snapshots left queued", term, suspended);
    }

    Ok(TermResult {
        term: term.to_string(),
        final_state: guard.current_state(),
        saves,
        suspended,
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
