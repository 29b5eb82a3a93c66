//! Per-page pipeline: guard gate → anomaly check → field extraction →
//! assembly → routing. Synchronous per page; a snapshot is processed to
//! completion before the next one is accepted.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::anomaly::{self, AnomalyKind};
use crate::extract;
use crate::page::PageSnapshot;
use crate::record;
use crate::router::{Artifact, ArtifactStore, CrawlOutcome};
use crate::session::SessionGuard;

/// Result of feeding one snapshot through the engine.
#[derive(Debug)]
pub enum Disposition {
    /// Guard is awaiting intervention; the snapshot was not inspected.
    Suspended,
    Processed(ProcessedPage),
}

#[derive(Debug)]
pub struct ProcessedPage {
    pub outcome: CrawlOutcome,
    pub artifacts: Vec<Artifact>,
}

/// Process one captured page end to end. Every non-suspended page yields
/// exactly one artifact set; artifacts are only written after classification
/// and assembly have completed.
pub fn process_page(
    snapshot: &PageSnapshot,
    search_term: &str,
    captured_at: DateTime<Utc>,
    guard: &mut SessionGuard,
    store: &ArtifactStore,
) -> Result<Disposition> {
    if !guard.should_extract() {
        return Ok(Disposition::Suspended);
    }

    let outcome = match anomaly::classify(snapshot) {
        Some(anomaly) => {
            // An empty result still proves the context is healthy.
            if anomaly.kind == AnomalyKind::EmptyResult {
                guard.snapshot_cleared();
            }
            CrawlOutcome::Anomaly(anomaly)
        }
        None => {
            guard.snapshot_cleared();
            let results = extract::extract_all(snapshot);
            CrawlOutcome::Record(record::assemble(&results, search_term, captured_at))
        }
    };

    let artifacts = store.route(&outcome, snapshot, search_term, guard)?;
    Ok(Disposition::Processed(ProcessedPage { outcome, artifacts }))
}

// ── Tests ──
