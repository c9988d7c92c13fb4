//! Stage report HTML → clean text.
//!
//! The page body is isolated from site chrome, result tables are turned into
//! pipe tables, `htmd` converts the rest to Markdown, and a short cleanup
//! pipeline removes what the extractor and the model do not need.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use stagecraft_shared::{Result, StagecraftError};

/// Tags dropped entirely during conversion.
const SKIP_TAGS: [&str; 9] = [
    "script", "style", "nav", "iframe", "noscript", "svg", "header", "footer", "form",
];

/// Clean report text plus a little page metadata.
#[derive(Debug, Clone)]
pub struct ReportText {
    pub text: String,
    /// `<title>` or first heading.
    pub title: Option<String>,
    pub word_count: usize,
}

impl ReportText {
    /// Length used by the "counts as a report" check.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Reduce a report page to clean Markdown-ish text.
#[instrument(skip(html), fields(len = html.len()))]
pub fn html_to_report_text(html: &str) -> Result<ReportText> {
    let page_title = document_title(html);
    let content_html = extract_content_html(html);
    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    let raw = converter
        .convert(&content_html)
        .map_err(|e| StagecraftError::parse(format!("htmd conversion failed: {e}")))?;

    let text = run_cleanup(&raw);
    let title = page_title.or_else(|| first_heading(&text));
    let word_count = text.split_whitespace().count();

    debug!(word_count, "report text extracted");
    Ok(ReportText {
        text,
        title,
        word_count,
    })
}

// ---------------------------------------------------------------------------
// Content isolation
// ---------------------------------------------------------------------------

fn document_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract the main content HTML, stripping chrome.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let selectors = [
        ".stage-report",
        ".race-report",
        "article",
        "[role=\"main\"]",
        "main",
        "#content",
        ".content",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    html.to_string()
}

/// Turn `<table>` elements into pipe tables before `htmd` sees them.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let Ok(table_sel) = Selector::parse("table") else {
        return html.to_string();
    };

    if doc.select(&table_sel).next().is_none() {
        return html.to_string();
    }

    // Re-serialize so table markup matches `ElementRef::html` byte for byte
    let mut result = doc.root_element().inner_html();
    for table in doc.select(&table_sel) {
        let md = table_to_pipe_rows(&table);
        result = result.replacen(&table.html(), &format!("<pre>{md}</pre>"), 1);
    }
    result
}

fn table_to_pipe_rows(table: &ElementRef) -> String {
    let (Ok(tr), Ok(cell)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
        return String::new();
    };

    table
        .select(&tr)
        .filter_map(|row| {
            let cells: Vec<String> = row
                .select(&cell)
                .map(|c| collapse_ws(&c.text().collect::<String>()))
                .collect();
            (!cells.is_empty()).then(|| format!("| {} |", cells.join(" | ")))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_heading(md: &str) -> Option<String> {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^#{1,3} (.+)$").expect("valid regex"));
    H_RE.captures(md).map(|c| c[1].trim().to_string())
}

// ---------------------------------------------------------------------------
// Cleanup passes
// ---------------------------------------------------------------------------

fn run_cleanup(md: &str) -> String {
    let mut result = md.to_string();
    result = strip_images(&result);
    result = unwrap_links(&result);
    result = strip_code_fences(&result);
    result = strip_leftover_html(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    result.trim().to_string()
}

/// `![alt](src)` carries nothing useful for extraction.
fn strip_images(md: &str) -> String {
    static IMG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));
    IMG_RE.replace_all(md, "").to_string()
}

/// `[text](href)` → `text`.
fn unwrap_links(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
    LINK_RE.replace_all(md, "$1").to_string()
}

/// Pipe tables arrive wrapped in code fences from the `<pre>` trick.
fn strip_code_fences(md: &str) -> String {
    md.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_leftover_html(md: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^>]*)?/?>").expect("valid regex"));
    TAG_RE.replace_all(md, "").to_string()
}

fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into one.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn load_fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/html")
            .join(name);
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"))
    }

    #[test]
    fn strips_chrome_and_keeps_body() {
        let html = r#"<html><head><title>Stage 4 report</title></head><body>
            <nav><a href="/">Home</a></nav>
            <article><h1>Stage 4</h1><p>The break went clear at <a href="/km">km 12</a>.</p></article>
            <footer><p>Copyright 2025</p></footer>
        </body></html>"#;
        let report = html_to_report_text(html).unwrap();
        assert!(report.text.contains("The break went clear at km 12."));
        assert!(!report.text.contains("Copyright"));
        assert!(!report.text.contains("Home"));
        assert_eq!(report.title.as_deref(), Some("Stage 4 report"));
    }

    #[test]
    fn tables_become_pipe_rows() {
        let html = r#"<html><body><main>
            <table><tr><th>Rnk</th><th>Rider</th><th>Team</th></tr>
            <tr><td>1</td><td>Jonas  Vingegaard</td><td>Visma</td></tr></table>
        </main></body></html>"#;
        let report = html_to_report_text(html).unwrap();
        assert!(report.text.contains("| 1 | Jonas Vingegaard | Visma |"));
        assert!(!report.text.contains("```"));
    }

    #[test]
    fn fixture_report_is_long_enough() {
        let report = html_to_report_text(&load_fixture("stage_report.html")).unwrap();
        assert!(report.char_count() > 200);
        assert!(report.text.contains("Amiens"));
        assert!(!report.text.contains("Subscribe to our newsletter"));
    }
}
