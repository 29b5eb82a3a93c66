//! Pre-extraction page classification. A page that is not a normal detail
//! page never reaches the field extractor; it is represented as data and
//! routed to diagnostics.

use serde::Serialize;

use crate::page::PageSnapshot;

/// Interception markers checked against the script-stripped markup (class
/// names, iframe sources) and the visible text. Script bodies are excluded so
/// a detail page whose bundled JS merely mentions a captcha library is not
/// misfiled.
const CHALLENGE_MARKUP: &[&str] = &["g-recaptcha", "recaptcha"];
const CHALLENGE_PHRASES: &[&str] = &["verify you are human", "captcha"];
const CHALLENGE_TITLES: &[&str] = &[
    "attention required",
    "access denied",
    "just a moment",
    "security check",
];
/// An unusually small page with one of these phrases is a block page even
/// without the usual widget markup.
const BLOCKED_PAGE_PHRASES: &[&str] = &["access denied", "request unsuccessful", "checking your browser"];
const SMALL_PAGE_LEN: usize = 512;

const EMPTY_RESULT_PHRASES: &[&str] = &[
    "no businesses found",
    "no records found",
    "no results found",
    "returned no results",
    "no matching entities",
];

/// Labels that anchor a detail page when the element ids have drifted.
const IDENTIFICATION_LABELS: &[&str] =
    &["business id", "entity id", "business name", "entity name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Challenge,
    EmptyResult,
    Unrecognized,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::Challenge => "challenge",
            AnomalyKind::EmptyResult => "empty_result",
            AnomalyKind::Unrecognized => "unrecognized",
        }
    }
}

/// Terminal classification of a non-data page. Never merged into a record.
#[derive(Debug, Clone)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub snapshot_source: String,
}

/// Classify a snapshot before extraction. `None` means the page is a normal,
/// extractable detail page.
///
/// Challenge detection runs first: a block page can coincidentally contain
/// "no results" wording, and misfiling it as an empty result would silently
/// drop data.
pub fn classify(snapshot: &PageSnapshot) -> Option<Anomaly> {
    let kind = if is_challenge(snapshot) {
        AnomalyKind::Challenge
    } else if is_empty_result(snapshot) {
        AnomalyKind::EmptyResult
    } else if !has_detail_anchor(snapshot) {
        AnomalyKind::Unrecognized
    } else {
        return None;
    };

    Some(Anomaly {
        kind,
        snapshot_source: snapshot.source().to_string(),
    })
}

fn is_challenge(snapshot: &PageSnapshot) -> bool {
    let markup = snapshot.markup().to_lowercase();
    if CHALLENGE_MARKUP.iter().any(|m| markup.contains(m)) {
        return true;
    }

    let text = snapshot.text().to_lowercase();
    if CHALLENGE_PHRASES.iter().any(|p| text.contains(p)) {
        return true;
    }

    let title = snapshot.title().to_lowercase();
    if CHALLENGE_TITLES.iter().any(|t| title.contains(t)) {
        return true;
    }

    text.len() < SMALL_PAGE_LEN && BLOCKED_PAGE_PHRASES.iter().any(|p| text.contains(p))
}

fn is_empty_result(snapshot: &PageSnapshot) -> bool {
    let text = snapshot.text().to_lowercase();
    if EMPTY_RESULT_PHRASES.iter().any(|p| text.contains(p)) {
        return true;
    }

    // A results grid with only its header row is an empty search.
    snapshot
        .tables()
        .iter()
        .any(|t| t.class.to_lowercase().contains("gvresults") && t.data_row_count() <= 1)
}

/// Either locator root for the identification fields: the known element ids,
/// or a label/value table row carrying an identification label.
fn has_detail_anchor(snapshot: &PageSnapshot) -> bool {
    if snapshot.has_element("MainContent_lblEntityID")
        || snapshot.has_element("MainContent_lblEntityName")
    {
        return true;
    }

    snapshot.tables().iter().any(|table| {
        table.rows.iter().any(|row| {
            row.len() >= 2
                && IDENTIFICATION_LABELS
                    .iter()
                    .any(|label| row[0].to_lowercase().contains(label))
        })
    })
}

// ── Tests ──
