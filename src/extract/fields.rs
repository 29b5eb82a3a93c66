//! Per-field locator table for the registry's business-detail page.
//!
//! Each field carries three locators tried in order: the exact element id the
//! registry renders today, the label its value sits next to in the detail
//! tables, and a text pattern that survives markup drift entirely.

/// How a raw value should be normalized during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Date,
    Status,
}

/// Primary locator: a stable element id, or an address composed from the
/// registry's street/city/state/zip id group.
#[derive(Debug, Clone, Copy)]
pub enum Primary {
    Id(&'static str),
    Address {
        street: &'static str,
        city: &'static str,
        state: &'static str,
        zip: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Core fields count toward the completeness denominator.
    pub core: bool,
    pub kind: ValueKind,
    pub primary: Primary,
    /// Lowercase label aliases for the positional (table-row) locator.
    pub labels: &'static [&'static str],
    /// Alternation used by the free-text locator.
    pub text_pattern: &'static str,
}

/// Fields that must be present for a record to count as a full success.
pub const MANDATORY_FIELDS: &[&str] = &["business_id", "business_name", "status"];

pub const FIELD_SPECS: &[FieldSpec] = &[
    FieldSpec {
        name: "business_id",
        core: true,
        kind: ValueKind::Text,
        primary: Primary::Id("MainContent_lblEntityID"),
        labels: &["business id", "entity id"],
        text_pattern: "Business ID|Entity ID",
    },
    FieldSpec {
        name: "business_name",
        core: true,
        kind: ValueKind::Text,
        primary: Primary::Id("MainContent_lblEntityName"),
        labels: &["business name", "entity name"],
        text_pattern: "Business Name|Entity Name",
    },
    FieldSpec {
        name: "entity_type",
        core: true,
        kind: ValueKind::Text,
        primary: Primary::Id("MainContent_lblEntityType"),
        labels: &["entity type"],
        text_pattern: "Entity Type",
    },
    FieldSpec {
        name: "formation_date",
        core: true,
        kind: ValueKind::Date,
        primary: Primary::Id("MainContent_lblFormationDate"),
        labels: &["formation date", "date of formation"],
        text_pattern: "Formation Date",
    },
    FieldSpec {
        name: "jurisdiction",
        core: true,
        kind: ValueKind::Text,
        primary: Primary::Id("MainContent_lblStateOfOrganization"),
        labels: &["jurisdiction", "state of organization"],
        text_pattern: "Jurisdiction|State of Organization",
    },
    FieldSpec {
        name: "status",
        core: true,
        kind: ValueKind::Status,
        primary: Primary::Id("MainContent_lblEntityStatus"),
        labels: &["entity status", "status"],
        text_pattern: "Entity Status|Status",
    },
    FieldSpec {
        name: "resident_agent",
        core: true,
        kind: ValueKind::Text,
        primary: Primary::Id("MainContent_lblResidentAgentName"),
        labels: &["resident agent"],
        text_pattern: "Resident Agent",
    },
    FieldSpec {
        name: "principal_office_address",
        core: true,
        kind: ValueKind::Text,
        primary: Primary::Address {
            street: "MainContent_lblPOAddress",
            city: "MainContent_lblPOAddressCity",
            state: "MainContent_lblPOAddressState",
            zip: "MainContent_lblPOAddressZip",
        },
        labels: &["principal office"],
        text_pattern: "Principal Office Address",
    },
    // Supplemental fields: extracted and persisted, but excluded from the
    // completeness denominator since they are absent on many healthy pages.
    FieldSpec {
        name: "last_reporting_year",
        core: false,
        kind: ValueKind::Text,
        primary: Primary::Id("MainContent_lblLastIROnFile"),
        labels: &["last report", "last annual report"],
        text_pattern: "Last Report",
    },
    FieldSpec {
        name: "next_report_due_date",
        core: false,
        kind: ValueKind::Date,
        primary: Primary::Id("MainContent_lblNextIRDue"),
        labels: &["next report", "next annual report"],
        text_pattern: "Next Report",
    },
    FieldSpec {
        name: "forfeiture_date",
        core: false,
        kind: ValueKind::Date,
        primary: Primary::Id("MainContent_lblForfeitureDate"),
        labels: &["forfeiture"],
        text_pattern: "Forfeiture Date",
    },
    FieldSpec {
        name: "registered_office_address",
        core: false,
        kind: ValueKind::Text,
        primary: Primary::Address {
            street: "MainContent_lblROAddress",
            city: "MainContent_lblROAddressCity",
            state: "MainContent_lblROAddressState",
            zip: "MainContent_lblROAddressZip",
        },
        labels: &["registered office"],
        text_pattern: "Registered Office Address",
    },
];

/// Number of fields in the completeness denominator.
pub fn core_field_count() -> usize {
    FIELD_SPECS.iter().filter(|s| s.core).count()
}

pub fn spec_for(name: &str) -> Option<&'static FieldSpec> {
    FIELD_SPECS.iter().find(|s| s.name == name)
}
