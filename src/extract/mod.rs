pub mod fields;

use regex::Regex;

use crate::page::PageSnapshot;
use fields::{FieldSpec, Primary, FIELD_SPECS};

/// Which locator produced a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Primary,
    Secondary,
    Tertiary,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Strategy {
    /// Confidence is fixed per strategy and informational only.
    pub fn confidence(self) -> Confidence {
        match self {
            Strategy::Primary => Confidence::High,
            Strategy::Secondary => Confidence::Medium,
            Strategy::Tertiary | Strategy::None => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldResult {
    pub field: &'static str,
    pub value: Option<String>,
    pub strategy: Strategy,
    pub confidence: Confidence,
}

impl FieldResult {
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// Run every field spec against one snapshot.
pub fn extract_all(snapshot: &PageSnapshot) -> Vec<FieldResult> {
    FIELD_SPECS.iter().map(|spec| extract(snapshot, spec)).collect()
}

/// Try the field's locators in priority order with early exit. Absence is a
/// normal outcome: all-miss yields `value: None, strategy: None`.
pub fn extract(snapshot: &PageSnapshot, spec: &FieldSpec) -> FieldResult {
    for (locate, strategy) in [
        (locate_primary as Locator, Strategy::Primary),
        (locate_secondary, Strategy::Secondary),
        (locate_tertiary, Strategy::Tertiary),
    ] {
        if let Some(value) = locate(snapshot, spec) {
            return FieldResult {
                field: spec.name,
                value: Some(value),
                strategy,
                confidence: strategy.confidence(),
            };
        }
    }
    FieldResult {
        field: spec.name,
        value: None,
        strategy: Strategy::None,
        confidence: Strategy::None.confidence(),
    }
}

type Locator = fn(&PageSnapshot, &FieldSpec) -> Option<String>;

fn locate_primary(snapshot: &PageSnapshot, spec: &FieldSpec) -> Option<String> {
    match spec.primary {
        Primary::Id(id) => non_blank(snapshot.element_text(id)?),
        Primary::Address {
            street,
            city,
            state,
            zip,
        } => compose_address(
            snapshot.element_text(street),
            snapshot.element_text(city),
            snapshot.element_text(state),
            snapshot.element_text(zip),
        ),
    }
}

/// Positional locator: first table row whose label cell matches one of the
/// field's aliases; the value is the cell next to it.
fn locate_secondary(snapshot: &PageSnapshot, spec: &FieldSpec) -> Option<String> {
    for table in snapshot.tables() {
        for row in &table.rows {
            if row.len() < 2 {
                continue;
            }
            let label = row[0].to_lowercase();
            if spec.labels.iter().any(|alias| label.contains(alias)) {
                if let Some(value) = non_blank(&row[1]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Free-text locator: label pattern followed by a tag boundary, matched over
/// the raw markup. Survives id and table-layout drift.
fn locate_tertiary(snapshot: &PageSnapshot, spec: &FieldSpec) -> Option<String> {
    let re = Regex::new(&format!(r"(?i)(?:{})\s*:?[^>]*>\s*([^<]+)", spec.text_pattern)).ok()?;
    let value = re
        .captures_iter(snapshot.html())
        .find_map(|caps| non_blank(&caps[1]));
    value
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Join street + "city, state zip" with " | ", skipping whatever is missing.
fn compose_address(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    zip: Option<&str>,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(s) = street.and_then(non_blank_ref) {
        parts.push(s.to_string());
    }
    let location = format!(
        "{}, {} {}",
        city.unwrap_or("").trim(),
        state.unwrap_or("").trim(),
        zip.unwrap_or("").trim()
    );
    let location = location.trim_matches(|c: char| c == ',' || c.is_whitespace());
    if !location.is_empty() {
        parts.push(location.to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

fn non_blank_ref(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

// ── Tests ──
