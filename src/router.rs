//! Classifies every processed page into the durable output namespaces and
//! writes the artifacts. Nothing is written before assembly/classification
//! has completed, so a cancelled page leaves no partial artifact behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::anomaly::{Anomaly, AnomalyKind};
use crate::page::PageSnapshot;
use crate::record::{BusinessRecord, ProcessingStatus};
use crate::session::SessionGuard;

static SANITIZE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w]+").unwrap());

const MAX_NAME_LEN: usize = 30;

/// Exactly one of the two per page visited.
#[derive(Debug)]
pub enum CrawlOutcome {
    Record(BusinessRecord),
    Anomaly(Anomaly),
}

impl CrawlOutcome {
    /// Audit-log label: the processing status for records, the anomaly kind
    /// otherwise.
    pub fn label(&self) -> &'static str {
        match self {
            CrawlOutcome::Record(record) => record.processing_status().as_str(),
            CrawlOutcome::Anomaly(anomaly) => anomaly.kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Record,
    FallbackSnapshot,
    Diagnostic,
    DiagnosticSnapshot,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Record => "record",
            ArtifactKind::FallbackSnapshot => "fallback_snapshot",
            ArtifactKind::Diagnostic => "diagnostic",
            ArtifactKind::DiagnosticSnapshot => "diagnostic_snapshot",
        }
    }
}

/// Descriptor of one persisted file, returned to the caller for the audit log.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub correlation_key: String,
}

#[derive(Serialize)]
struct Diagnostic<'a> {
    kind: AnomalyKind,
    search_term: &'a str,
    timestamp: DateTime<Utc>,
    correlation_key: &'a str,
    snapshot_source: &'a str,
}

/// One output namespace per parallel unit of work. Keys carry a microsecond
/// timestamp plus a per-store sequence counter, so neither concurrent routing
/// within one store nor a repeated run against the same root overwrites an
/// earlier artifact.
pub struct ArtifactStore {
    root: PathBuf,
    seq: AtomicU64,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in ["json", "html_fallback", "errors"] {
            fs::create_dir_all(root.join(dir))
                .with_context(|| format!("Failed to create output dir {}", root.join(dir).display()))?;
        }
        Ok(ArtifactStore {
            root,
            seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn correlation_key(&self, search_term: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}_{:04}_{}",
            at.format("%Y%m%d_%H%M%S_%6f"),
            self.seq.fetch_add(1, Ordering::Relaxed),
            sanitize(search_term)
        )
    }

    /// Persist one outcome. Records always land in `json/`; anything short of
    /// a full success additionally keeps its raw page under `html_fallback/`
    /// with the same correlation key. Anomalies go to `errors/` as a
    /// diagnostic plus the raw page; a challenge also signals the guard.
    pub fn route(
        &self,
        outcome: &CrawlOutcome,
        snapshot: &PageSnapshot,
        search_term: &str,
        guard: &mut SessionGuard,
    ) -> Result<Vec<Artifact>> {
        let key = self.correlation_key(search_term, Utc::now());
        match outcome {
            CrawlOutcome::Record(record) => self.route_record(record, snapshot, &key),
            CrawlOutcome::Anomaly(anomaly) => {
                if anomaly.kind == AnomalyKind::Challenge {
                    warn!(
                        "Challenge page for '{}' ({}); pausing term for intervention",
                        search_term,
                        snapshot.source()
                    );
                    guard.challenge_detected();
                }
                self.route_anomaly(anomaly, snapshot, search_term, &key)
            }
        }
    }

    fn route_record(
        &self,
        record: &BusinessRecord,
        snapshot: &PageSnapshot,
        key: &str,
    ) -> Result<Vec<Artifact>> {
        let name = sanitize(record.business_name().unwrap_or("unknown"));
        let json_path = self
            .root
            .join("json")
            .join(format!("business_{}_{}.json", name, key));
        let body = serde_json::to_string_pretty(record)?;
        fs::write(&json_path, body)
            .with_context(|| format!("Failed to write record {}", json_path.display()))?;
        info!("Saved record {}", json_path.display());

        let mut artifacts = vec![Artifact {
            kind: ArtifactKind::Record,
            path: json_path,
            correlation_key: key.to_string(),
        }];

        if record.processing_status() != ProcessingStatus::Success {
            let html_path = self.root.join("html_fallback").join(format!("{}.html", key));
            fs::write(&html_path, annotate_snapshot(snapshot, key))
                .with_context(|| format!("Failed to write fallback {}", html_path.display()))?;
            info!("Saved fallback snapshot {}", html_path.display());
            artifacts.push(Artifact {
                kind: ArtifactKind::FallbackSnapshot,
                path: html_path,
                correlation_key: key.to_string(),
            });
        }

        Ok(artifacts)
    }

    fn route_anomaly(
        &self,
        anomaly: &Anomaly,
        snapshot: &PageSnapshot,
        search_term: &str,
        key: &str,
    ) -> Result<Vec<Artifact>> {
        let diagnostic = Diagnostic {
            kind: anomaly.kind,
            search_term,
            timestamp: Utc::now(),
            correlation_key: key,
            snapshot_source: &anomaly.snapshot_source,
        };

        let json_path = self
            .root
            .join("errors")
            .join(format!("error_{}_{}.json", sanitize(search_term), key));
        fs::write(&json_path, serde_json::to_string_pretty(&diagnostic)?)
            .with_context(|| format!("Failed to write diagnostic {}", json_path.display()))?;

        let html_path = self.root.join("errors").join(format!("{}.html", key));
        fs::write(&html_path, annotate_snapshot(snapshot, key))
            .with_context(|| format!("Failed to write diagnostic snapshot {}", html_path.display()))?;

        info!(
            "Saved {} diagnostic {}",
            anomaly.kind.as_str(),
            json_path.display()
        );

        Ok(vec![
            Artifact {
                kind: ArtifactKind::Diagnostic,
                path: json_path,
                correlation_key: key.to_string(),
            },
            Artifact {
                kind: ArtifactKind::DiagnosticSnapshot,
                path: html_path,
                correlation_key: key.to_string(),
            },
        ])
    }
}

fn annotate_snapshot(snapshot: &PageSnapshot, key: &str) -> String {
    format!(
        "<!-- correlation_key: {} -->\n<!-- source: {} -->\n{}",
        key,
        snapshot.source(),
        snapshot.html()
    )
}

fn sanitize(raw: &str) -> String {
    let cleaned = SANITIZE_RE.replace_all(raw, "_");
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

// ── Tests ──
