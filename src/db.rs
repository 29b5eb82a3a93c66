use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

use crate::record::BusinessRecord;

pub const DEFAULT_DB_PATH: &str = "data/sos.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            id           INTEGER PRIMARY KEY,
            path         TEXT UNIQUE NOT NULL,
            term         TEXT NOT NULL,
            captured_at  TEXT NOT NULL,
            processed    BOOLEAN NOT NULL DEFAULT 0,
            processed_at TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_processed ON snapshots(processed);
        CREATE INDEX IF NOT EXISTS idx_snapshots_term ON snapshots(term);

        -- One row per processed page: the audit trail.
        CREATE TABLE IF NOT EXISTS outcomes (
            id              INTEGER PRIMARY KEY,
            correlation_key TEXT NOT NULL,
            term            TEXT NOT NULL,
            outcome         TEXT NOT NULL,
            source          TEXT NOT NULL,
            artifact_count  INTEGER NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_outcomes_term ON outcomes(term);
        CREATE INDEX IF NOT EXISTS idx_outcomes_outcome ON outcomes(outcome);

        CREATE TABLE IF NOT EXISTS records (
            correlation_key           TEXT PRIMARY KEY,
            business_id               TEXT,
            business_name             TEXT,
            entity_type               TEXT,
            formation_date            TEXT,
            jurisdiction              TEXT,
            status                    TEXT,
            resident_agent            TEXT,
            principal_office_address  TEXT,
            registered_office_address TEXT,
            last_reporting_year       TEXT,
            next_report_due_date      TEXT,
            forfeiture_date           TEXT,
            search_term               TEXT NOT NULL,
            processing_status         TEXT NOT NULL
                CHECK(processing_status IN ('success','partial','failed')),
            completeness              REAL NOT NULL,
            extracted_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_status ON records(processing_status);
        CREATE INDEX IF NOT EXISTS idx_records_name ON records(business_name);

        -- Guard state per search term, persisted so a paused crawl resumes
        -- across invocations.
        CREATE TABLE IF NOT EXISTS term_sessions (
            term       TEXT PRIMARY KEY,
            state      TEXT NOT NULL
                CHECK(state IN ('active','awaiting_intervention','resuming')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Snapshot queue ──

pub struct SnapshotRow {
    pub id: i64,
    pub path: String,
    pub term: String,
    pub captured_at: String,
}

pub fn insert_snapshots(conn: &Connection, rows: &[(String, String, String)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO snapshots (path, term, captured_at) VALUES (?1, ?2, ?3)",
        )?;
        for (path, term, captured_at) in rows {
            count += stmt.execute(rusqlite::params![path, term, captured_at])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unprocessed(
    conn: &Connection,
    term: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<SnapshotRow>> {
    let mut sql =
        "SELECT id, path, term, captured_at FROM snapshots WHERE processed = 0".to_string();
    if term.is_some() {
        sql.push_str(" AND term = ?1");
    }
    sql.push_str(" ORDER BY term, path");
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row| {
        Ok(SnapshotRow {
            id: row.get(0)?,
            path: row.get(1)?,
            term: row.get(2)?,
            captured_at: row.get(3)?,
        })
    };
    let rows = match term {
        Some(t) => stmt
            .query_map([t], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

// ── Outcomes & records ──

pub struct OutcomeRow {
    pub correlation_key: String,
    pub term: String,
    pub outcome: String,
    pub source: String,
    pub artifact_count: usize,
}

/// Everything the audit index keeps about one processed page.
pub struct PageResult {
    pub snapshot_id: i64,
    pub outcome: OutcomeRow,
    pub record: Option<(String, BusinessRecord)>,
}

/// Persist one term's run in a single transaction: outcome rows, assembled
/// records, processed flags and the final guard state commit together or roll
/// back together. A snapshot is never flagged processed without its audit
/// rows landing in the same commit.
pub fn save_term_results(
    conn: &Connection,
    term: &str,
    state: &str,
    pages: &[PageResult],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut outcome_stmt = tx.prepare(
            "INSERT INTO outcomes (correlation_key, term, outcome, source, artifact_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut record_stmt = tx.prepare(
            "INSERT OR REPLACE INTO records
             (correlation_key, business_id, business_name, entity_type, formation_date,
              jurisdiction, status, resident_agent, principal_office_address,
              registered_office_address, last_reporting_year, next_report_due_date,
              forfeiture_date, search_term, processing_status, completeness, extracted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        )?;
        let mut mark_stmt = tx.prepare(
            "UPDATE snapshots SET processed = 1, processed_at = datetime('now') WHERE id = ?1",
        )?;

        for page in pages {
            let o = &page.outcome;
            outcome_stmt.execute(rusqlite::params![
                o.correlation_key,
                o.term,
                o.outcome,
                o.source,
                o.artifact_count as i64,
            ])?;
            if let Some((key, r)) = &page.record {
                record_stmt.execute(rusqlite::params![
                    key,
                    r.identification.business_id,
                    r.identification.business_name,
                    r.identification.entity_type,
                    r.registration.formation_date,
                    r.registration.jurisdiction,
                    r.registration.status,
                    r.contact.resident_agent,
                    r.contact.principal_office_address,
                    r.contact.registered_office_address,
                    r.compliance.last_reporting_year,
                    r.compliance.next_report_due_date,
                    r.compliance.forfeiture_date,
                    r.metadata.search_term,
                    r.metadata.processing_status.as_str(),
                    r.metadata.completeness,
                    r.metadata.extracted_at.to_rfc3339(),
                ])?;
            }
            mark_stmt.execute([page.snapshot_id])?;
        }

        tx.execute(
            "INSERT INTO term_sessions (term, state, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(term) DO UPDATE SET state = ?2, updated_at = datetime('now')",
            rusqlite::params![term, state],
        )?;
    }
    tx.commit()?;
    Ok(())
}

// ── Session persistence ──

pub fn session_state(conn: &Connection, term: &str) -> Result<Option<String>> {
    let state = conn
        .query_row(
            "SELECT state FROM term_sessions WHERE term = ?1",
            [term],
            |r| r.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(state)
}

pub fn set_session_state(conn: &Connection, term: &str, state: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO term_sessions (term, state, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(term) DO UPDATE SET state = ?2, updated_at = datetime('now')",
        rusqlite::params![term, state],
    )?;
    Ok(())
}

// ── Overview ──

pub struct OverviewRow {
    pub business_id: String,
    pub business_name: String,
    pub entity_type: String,
    pub status: String,
    pub processing_status: String,
    pub completeness: f64,
    pub search_term: String,
}

pub fn fetch_overview(
    conn: &Connection,
    status: Option<&str>,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut sql = "SELECT COALESCE(business_id,''), COALESCE(business_name,''),
                          COALESCE(entity_type,''), COALESCE(status,''),
                          processing_status, completeness, search_term
                   FROM records"
        .to_string();
    if status.is_some() {
        sql.push_str(" WHERE processing_status = ?1");
    }
    sql.push_str(&format!(" ORDER BY business_name LIMIT {}", limit));

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row| {
        Ok(OverviewRow {
            business_id: row.get(0)?,
            business_name: row.get(1)?,
            entity_type: row.get(2)?,
            status: row.get(3)?,
            processing_status: row.get(4)?,
            completeness: row.get(5)?,
            search_term: row.get(6)?,
        })
    };
    let rows = match status {
        Some(s) => stmt
            .query_map([s], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total_snapshots: usize,
    pub processed: usize,
    pub pending: usize,
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
    pub challenges: usize,
    pub empty_results: usize,
    pub unrecognized: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total_snapshots: usize =
        conn.query_row("SELECT COUNT(*) FROM snapshots", [], |r| r.get(0))?;
    let processed: usize = conn.query_row(
        "SELECT COUNT(*) FROM snapshots WHERE processed = 1",
        [],
        |r| r.get(0),
    )?;
    let count_outcome = |label: &str| -> Result<usize> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM outcomes WHERE outcome = ?1",
            [label],
            |r| r.get(0),
        )?)
    };
    Ok(Stats {
        total_snapshots,
        processed,
        pending: total_snapshots - processed,
        success: count_outcome("success")?,
        partial: count_outcome("partial")?,
        failed: count_outcome("failed")?,
        challenges: count_outcome("challenge")?,
        empty_results: count_outcome("empty_result")?,
        unrecognized: count_outcome("unrecognized")?,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Confidence, FieldResult, Strategy};
    use crate::record::assemble;
    use chrono::{TimeZone, Utc};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn snapshot_registration_is_idempotent() {
        let conn = conn();
        let rows = vec![(
            "snaps/LLC/page1.html".to_string(),
            "LLC".to_string(),
            "2024-06-01T12:00:00Z".to_string(),
        )];
        assert_eq!(insert_snapshots(&conn, &rows).unwrap(), 1);
        assert_eq!(insert_snapshots(&conn, &rows).unwrap(), 0);
    }

    fn page(snapshot_id: i64, term: &str, outcome: &str) -> PageResult {
        PageResult {
            snapshot_id,
            outcome: OutcomeRow {
                correlation_key: format!("key{}", snapshot_id),
                term: term.into(),
                outcome: outcome.into(),
                source: format!("s/{}/{}.html", term, snapshot_id),
                artifact_count: 1,
            },
            record: None,
        }
    }

    #[test]
    fn queue_drains_as_term_results_commit() {
        let conn = conn();
        let rows = vec![
            ("s/LLC/a.html".into(), "LLC".into(), "2024-06-01T12:00:00Z".into()),
            ("s/INC/b.html".into(), "INC".into(), "2024-06-01T12:01:00Z".into()),
        ];
        insert_snapshots(&conn, &rows).unwrap();

        let pending = fetch_unprocessed(&conn, None, None).unwrap();
        assert_eq!(pending.len(), 2);

        // Ordered by term: INC first, LLC second.
        let llc = &pending[1];
        assert_eq!(llc.term, "LLC");
        save_term_results(&conn, "LLC", "active", &[page(llc.id, "LLC", "empty_result")])
            .unwrap();

        assert_eq!(fetch_unprocessed(&conn, None, None).unwrap().len(), 1);
        assert!(fetch_unprocessed(&conn, Some("LLC"), None).unwrap().is_empty());
    }

    #[test]
    fn failed_term_save_rolls_back_entirely() {
        let conn = conn();
        insert_snapshots(
            &conn,
            &[("s/LLC/a.html".into(), "LLC".into(), "2024-06-01T12:00:00Z".into())],
        )
        .unwrap();
        let pending = fetch_unprocessed(&conn, None, None).unwrap();

        // The state CHECK rejects the last insert in the transaction; nothing
        // written before it may stick.
        let result =
            save_term_results(&conn, "LLC", "bogus", &[page(pending[0].id, "LLC", "success")]);
        assert!(result.is_err());

        assert_eq!(fetch_unprocessed(&conn, None, None).unwrap().len(), 1);
        assert_eq!(get_stats(&conn).unwrap().success, 0);
        assert_eq!(session_state(&conn, "LLC").unwrap(), None);
    }

    #[test]
    fn session_state_round_trip() {
        let conn = conn();
        assert_eq!(session_state(&conn, "LLC").unwrap(), None);
        set_session_state(&conn, "LLC", "awaiting_intervention").unwrap();
        assert_eq!(
            session_state(&conn, "LLC").unwrap().as_deref(),
            Some("awaiting_intervention")
        );
        set_session_state(&conn, "LLC", "active").unwrap();
        assert_eq!(session_state(&conn, "LLC").unwrap().as_deref(), Some("active"));
    }

    #[test]
    fn records_and_outcomes_feed_stats_and_overview() {
        let conn = conn();
        insert_snapshots(
            &conn,
            &[("s/ACME/a.html".into(), "ACME".into(), "2024-06-01T12:00:00Z".into())],
        )
        .unwrap();
        let pending = fetch_unprocessed(&conn, None, None).unwrap();

        let results = vec![
            FieldResult {
                field: "business_id",
                value: Some("1234567".into()),
                strategy: Strategy::Primary,
                confidence: Confidence::High,
            },
            FieldResult {
                field: "business_name",
                value: Some("ACME INC".into()),
                strategy: Strategy::Primary,
                confidence: Confidence::High,
            },
            FieldResult {
                field: "status",
                value: Some("Active".into()),
                strategy: Strategy::Secondary,
                confidence: Confidence::Medium,
            },
        ];
        let record = assemble(
            &results,
            "ACME",
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        );
        save_term_results(
            &conn,
            "ACME",
            "active",
            &[PageResult {
                snapshot_id: pending[0].id,
                outcome: OutcomeRow {
                    correlation_key: "key1".into(),
                    term: "ACME".into(),
                    outcome: "success".into(),
                    source: "s/ACME/a.html".into(),
                    artifact_count: 1,
                },
                record: Some(("key1".to_string(), record)),
            }],
        )
        .unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(session_state(&conn, "ACME").unwrap().as_deref(), Some("active"));

        let overview = fetch_overview(&conn, Some("success"), 10).unwrap();
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].business_name, "ACME INC");
        assert_eq!(overview[0].status, "Active");
    }
}
