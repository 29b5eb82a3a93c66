use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").unwrap());
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static ID_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<[a-z][a-z0-9]*\b[^>]*\bid\s*=\s*"([^"]+)"[^>]*>([^<]*)"#).unwrap()
});
static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b([^>]*)>(.*?)</table>").unwrap());
static ROW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]>").unwrap());
static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bclass\s*=\s*"([^"]*)""#).unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// One `<table>` from the page: its class attribute and tag-stripped cells.
#[derive(Debug, Clone)]
pub struct Table {
    pub class: String,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Data rows only: rows with at least one non-empty cell, header excluded
    /// by the caller where it matters.
    pub fn data_row_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.iter().any(|c| !c.is_empty()))
            .count()
    }
}

/// Immutable structural view of one captured page. Parsed once; everything
/// downstream (anomaly check, field extraction, routing) reads from it.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    source: String,
    html: String,
    markup: String,
    title: String,
    ids: HashMap<String, String>,
    tables: Vec<Table>,
    text: String,
}

impl PageSnapshot {
    pub fn from_html(source: impl Into<String>, html: impl Into<String>) -> Self {
        let html = html.into();
        let stripped = SCRIPT_RE.replace_all(&html, " ");

        let title = TITLE_RE
            .captures(&stripped)
            .map(|c| flatten_text(&c[1]))
            .unwrap_or_default();

        let mut ids = HashMap::new();
        for caps in ID_TEXT_RE.captures_iter(&stripped) {
            let text = decode_entities(caps[2].trim());
            // First occurrence wins; duplicate ids are malformed markup anyway
            ids.entry(caps[1].to_string()).or_insert(text);
        }

        let tables = TABLE_RE
            .captures_iter(&stripped)
            .map(|caps| {
                let class = CLASS_RE
                    .captures(&caps[1])
                    .map(|c| c[1].to_string())
                    .unwrap_or_default();
                let rows = ROW_RE
                    .captures_iter(&caps[2])
                    .map(|row| {
                        CELL_RE
                            .captures_iter(&row[1])
                            .map(|cell| flatten_text(&cell[1]))
                            .collect()
                    })
                    .collect();
                Table { class, rows }
            })
            .collect();

        let text = flatten_text(&stripped);

        PageSnapshot {
            source: source.into(),
            markup: stripped.into_owned(),
            html,
            title,
            ids,
            tables,
            text,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        Ok(Self::from_html(path.display().to_string(), html))
    }

    /// Text content of the element with this id, if present and non-empty.
    pub fn element_text(&self, id: &str) -> Option<&str> {
        self.ids.get(id).map(String::as_str).filter(|t| !t.is_empty())
    }

    pub fn has_element(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Markup with script and style bodies removed. Marker checks go against
    /// this; `html()` keeps the page byte-for-byte for fallback artifacts.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Visible page text, tags stripped and whitespace collapsed.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Strip tags, decode entities, collapse whitespace.
fn flatten_text(fragment: &str) -> String {
    let no_tags = TAG_RE.replace_all(fragment, " ");
    let decoded = decode_entities(&no_tags);
    WS_RE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_text_by_id() {
        let snap = PageSnapshot::from_html(
            "test",
            r#"<span id="MainContent_lblEntityID">1234567</span>"#,
        );
        assert_eq!(snap.element_text("MainContent_lblEntityID"), Some("1234567"));
    }

    #[test]
    fn empty_element_is_absent() {
        let snap = PageSnapshot::from_html("test", r#"<span id="x">   </span>"#);
        assert!(snap.has_element("x"));
        assert_eq!(snap.element_text("x"), None);
    }

    #[test]
    fn entities_decoded() {
        let snap = PageSnapshot::from_html("test", r#"<span id="n">A &amp; B&nbsp;LLC</span>"#);
        assert_eq!(snap.element_text("n"), Some("A & B LLC"));
    }

    #[test]
    fn table_cells_stripped() {
        let html = r#"<table class="detail"><tr><td>Business ID</td><td><b>987</b></td></tr></table>"#;
        let snap = PageSnapshot::from_html("test", html);
        assert_eq!(snap.tables().len(), 1);
        assert_eq!(snap.tables()[0].class, "detail");
        assert_eq!(snap.tables()[0].rows[0], vec!["Business ID", "987"]);
    }

    #[test]
    fn title_extracted() {
        let snap =
            PageSnapshot::from_html("test", "<html><head><title>Business Search</title></head></html>");
        assert_eq!(snap.title(), "Business Search");
    }

    #[test]
    fn script_content_not_in_text() {
        let snap = PageSnapshot::from_html(
            "test",
            "<body><script>var captcha = 1;</script>Hello</body>",
        );
        assert_eq!(snap.text(), "Hello");
    }

    #[test]
    fn script_bodies_stripped_from_markup() {
        let snap = PageSnapshot::from_html(
            "test",
            "<body><script>var recaptchaLoader = 1;</script><p>Hello</p></body>",
        );
        assert!(!snap.markup().contains("recaptcha"));
        assert!(snap.html().contains("recaptcha"));
    }

    #[test]
    fn detail_fixture_parses() {
        let html = std::fs::read_to_string("tests/fixtures/detail_full.html").unwrap();
        let snap = PageSnapshot::from_html("detail_full", html);
        assert_eq!(
            snap.element_text("MainContent_lblEntityName"),
            Some("EXAMPLE COMPANY LLC")
        );
        assert!(!snap.tables().is_empty());
    }
}
