//! Merges field-level results into one immutable business record and decides
//! the page's overall processing status.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::extract::fields::{self, ValueKind, MANDATORY_FIELDS};
use crate::extract::FieldResult;

/// Registry status vocabulary; raw values are case-normalized against this
/// list, anything else passes through verbatim.
const STATUS_VOCABULARY: &[&str] = &[
    "Active and In Good Standing",
    "Active",
    "Forfeited - Failed to Timely File A/R",
    "Forfeited",
    "Dissolved",
    "Cancelled",
    "Merged",
    "Withdrawn",
    "Delinquent",
];

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%Y-%m-%d", "%m-%d-%Y"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    Partial,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Partial => "partial",
            ProcessingStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub business_id: Option<String>,
    pub business_name: Option<String>,
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub formation_date: Option<String>,
    pub jurisdiction: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Compliance {
    pub last_reporting_year: Option<String>,
    pub next_report_due_date: Option<String>,
    pub forfeiture_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub resident_agent: Option<String>,
    pub principal_office_address: Option<String>,
    pub registered_office_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub extracted_at: DateTime<Utc>,
    pub search_term: String,
    pub processing_status: ProcessingStatus,
    pub completeness: f64,
}

/// One assembled entity. Created once per page, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct BusinessRecord {
    pub identification: Identification,
    pub registration: Registration,
    pub compliance: Compliance,
    pub contact: Contact,
    pub metadata: Metadata,
}

impl BusinessRecord {
    pub fn processing_status(&self) -> ProcessingStatus {
        self.metadata.processing_status
    }

    pub fn business_name(&self) -> Option<&str> {
        self.identification.business_name.as_deref()
    }
}

/// Merge field results into a record. Deterministic for identical inputs and
/// `captured_at`; the timestamp is the snapshot's capture time, not now().
pub fn assemble(
    results: &[FieldResult],
    search_term: &str,
    captured_at: DateTime<Utc>,
) -> BusinessRecord {
    let value = |name: &str| -> Option<String> {
        let result = results.iter().find(|r| r.field == name)?;
        let raw = result.value.as_deref()?;
        let kind = fields::spec_for(name).map(|s| s.kind).unwrap_or(ValueKind::Text);
        Some(normalize(raw, kind))
    };

    let core_present = results
        .iter()
        .filter(|r| fields::spec_for(r.field).is_some_and(|s| s.core))
        .filter(|r| r.is_present())
        .count();
    let completeness = core_present as f64 / fields::core_field_count() as f64;

    let mandatory_present = MANDATORY_FIELDS
        .iter()
        .filter(|name| {
            results
                .iter()
                .any(|r| r.field == **name && r.is_present())
        })
        .count();
    let processing_status = if mandatory_present == MANDATORY_FIELDS.len() {
        ProcessingStatus::Success
    } else if mandatory_present > 0 {
        ProcessingStatus::Partial
    } else {
        ProcessingStatus::Failed
    };

    BusinessRecord {
        identification: Identification {
            business_id: value("business_id"),
            business_name: value("business_name"),
            entity_type: value("entity_type"),
        },
        registration: Registration {
            formation_date: value("formation_date"),
            jurisdiction: value("jurisdiction"),
            status: value("status"),
        },
        compliance: Compliance {
            last_reporting_year: value("last_reporting_year"),
            next_report_due_date: value("next_report_due_date"),
            forfeiture_date: value("forfeiture_date"),
        },
        contact: Contact {
            resident_agent: value("resident_agent"),
            principal_office_address: value("principal_office_address"),
            registered_office_address: value("registered_office_address"),
        },
        metadata: Metadata {
            extracted_at: captured_at,
            search_term: search_term.to_string(),
            processing_status,
            completeness,
        },
    }
}

fn normalize(raw: &str, kind: ValueKind) -> String {
    let trimmed = raw.trim();
    match kind {
        ValueKind::Text => trimmed.to_string(),
        ValueKind::Date => normalize_date(trimmed),
        ValueKind::Status => normalize_status(trimmed),
    }
}

/// Canonical `YYYY-MM-DD`; an unparseable value stays verbatim and still
/// counts as present.
fn normalize_date(raw: &str) -> String {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    raw.to_string()
}

fn normalize_status(raw: &str) -> String {
    STATUS_VOCABULARY
        .iter()
        .find(|known| known.eq_ignore_ascii_case(raw))
        .map(|known| known.to_string())
        .unwrap_or_else(|| raw.to_string())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Confidence, Strategy};
    use chrono::TimeZone;

    fn present(field: &'static str, value: &str) -> FieldResult {
        FieldResult {
            field,
            value: Some(value.to_string()),
            strategy: Strategy::Primary,
            confidence: Confidence::High,
        }
    }

    fn absent(field: &'static str) -> FieldResult {
        FieldResult {
            field,
            value: None,
            strategy: Strategy::None,
            confidence: Confidence::Low,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn all_mandatory_present_is_success() {
        let results = vec![
            present("business_id", "1234567"),
            present("business_name", "ACME INC"),
            present("status", "Active"),
        ];
        let record = assemble(&results, "ACME", ts());
        assert_eq!(record.processing_status(), ProcessingStatus::Success);
    }

    #[test]
    fn one_mandatory_present_is_partial() {
        let results = vec![
            present("business_name", "ACME INC"),
            absent("business_id"),
            absent("status"),
        ];
        let record = assemble(&results, "ACME", ts());
        assert_eq!(record.processing_status(), ProcessingStatus::Partial);
    }

    #[test]
    fn no_mandatory_present_is_failed() {
        let results = vec![
            present("entity_type", "LLC"),
            present("jurisdiction", "KANSAS"),
        ];
        let record = assemble(&results, "LLC", ts());
        assert_eq!(record.processing_status(), ProcessingStatus::Failed);
    }

    #[test]
    fn name_only_scores_one_eighth() {
        let results = vec![present("business_name", "Example Company LLC")];
        let record = assemble(&results, "EXAMPLE", ts());
        assert_eq!(record.metadata.completeness, 1.0 / 8.0);
        assert_eq!(record.processing_status(), ProcessingStatus::Partial);
    }

    #[test]
    fn supplemental_fields_do_not_change_completeness() {
        let base = vec![present("business_name", "ACME INC")];
        let with_supplemental = vec![
            present("business_name", "ACME INC"),
            present("forfeiture_date", "07/15/2019"),
            present("last_reporting_year", "2018"),
        ];
        let a = assemble(&base, "ACME", ts());
        let b = assemble(&with_supplemental, "ACME", ts());
        assert_eq!(a.metadata.completeness, b.metadata.completeness);
    }

    #[test]
    fn assemble_is_deterministic() {
        let results = vec![
            present("business_id", "1234567"),
            present("business_name", "ACME INC"),
            present("status", "ACTIVE"),
            present("formation_date", "01/15/2005"),
        ];
        let a = serde_json::to_string(&assemble(&results, "ACME", ts())).unwrap();
        let b = serde_json::to_string(&assemble(&results, "ACME", ts())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dates_normalized_to_iso() {
        for raw in ["01/15/2005", "January 15, 2005", "Jan 15, 2005", "2005-01-15"] {
            let results = vec![present("formation_date", raw)];
            let record = assemble(&results, "X", ts());
            assert_eq!(
                record.registration.formation_date.as_deref(),
                Some("2005-01-15"),
                "input {raw}"
            );
        }
    }

    #[test]
    fn unparseable_date_kept_verbatim_and_counts() {
        let results = vec![present("formation_date", "sometime in 2005")];
        let record = assemble(&results, "X", ts());
        assert_eq!(
            record.registration.formation_date.as_deref(),
            Some("sometime in 2005")
        );
        assert!(record.metadata.completeness > 0.0);
    }

    #[test]
    fn status_case_normalized_against_vocabulary() {
        let results = vec![present("status", "  active and in good standing ")];
        let record = assemble(&results, "X", ts());
        assert_eq!(
            record.registration.status.as_deref(),
            Some("Active and In Good Standing")
        );
    }

    #[test]
    fn unknown_status_passes_through() {
        let results = vec![present("status", "Pending Reinstatement")];
        let record = assemble(&results, "X", ts());
        assert_eq!(
            record.registration.status.as_deref(),
            Some("Pending Reinstatement")
        );
    }
}
