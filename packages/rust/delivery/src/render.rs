//! Format renderers.
//!
//! Every renderer is a pure function of its [`RenderInput`]; nothing here
//! touches the filesystem or the clock.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use stagecraft_shared::DeliveryFormat;

/// Everything a renderer may draw on.
#[derive(Debug, Clone)]
pub struct RenderInput<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub metadata: &'a BTreeMap<String, Value>,
    /// Analysis detail embedded by the structured format.
    pub analysis: Value,
    /// Editing detail embedded by the structured format.
    pub editing: Value,
    /// Character bound for the message format.
    pub message_limit: usize,
}

/// Render exactly one format.
pub fn render(format: DeliveryFormat, input: &RenderInput<'_>) -> String {
    match format {
        DeliveryFormat::Markup => render_markup(input.title, input.text, input.metadata),
        DeliveryFormat::Document => render_document(input.title, input.text, input.metadata),
        DeliveryFormat::Message => render_message(input.title, input.text, input.message_limit),
        DeliveryFormat::Structured => render_structured(input),
    }
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

fn footer_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "n/a".into(),
        other => other.to_string(),
    }
}

/// Markdown: title, separator, body, metadata footer.
pub fn render_markup(title: &str, text: &str, metadata: &BTreeMap<String, Value>) -> String {
    let mut out = format!("# {title}\n\n---\n\n{}\n", text.trim());
    if !metadata.is_empty() {
        out.push_str("\n---\n\n");
        for (key, value) in metadata {
            out.push_str(&format!("- **{key}**: {}\n", footer_value(value)));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

const DOCUMENT_CSS: &str = "\
body { margin: 0; background: #f6f4ef; color: #222; font-family: Georgia, 'Times New Roman', serif; }
article { max-width: 42rem; margin: 3rem auto; padding: 2rem 2.5rem; background: #fff; box-shadow: 0 1px 4px rgba(0,0,0,.12); }
h1 { font-size: 2rem; line-height: 1.2; margin-top: 0; }
p { font-size: 1.1rem; line-height: 1.7; }
hr { border: 0; border-top: 1px solid #ddd; margin: 2rem 0; }
ul { padding-left: 1.2rem; color: #666; font-family: system-ui, sans-serif; font-size: .85rem; }
";

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Escape, then turn balanced `**` pairs into `<strong>`.
fn inline_html(text: &str) -> String {
    let escaped = escape_html(text);
    let parts: Vec<&str> = escaped.split("**").collect();
    if parts.len() < 3 || parts.len() % 2 == 0 {
        return escaped;
    }
    let mut out = String::with_capacity(escaped.len() + 16);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(if i % 2 == 1 { "<strong>" } else { "</strong>" });
        }
        out.push_str(part);
    }
    out
}

/// Convert the small Markdown subset produced by [`render_markup`] to HTML.
pub fn markup_to_html(markup: &str) -> String {
    let mut html = String::new();
    for block in markup.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        if block == "---" {
            html.push_str("<hr />\n");
            continue;
        }
        let hashes = block.chars().take_while(|&c| c == '#').count();
        if (1..=6).contains(&hashes) && block[hashes..].starts_with(' ') {
            let heading = block[hashes..].trim();
            html.push_str(&format!("<h{hashes}>{}</h{hashes}>\n", inline_html(heading)));
            continue;
        }
        let lines: Vec<&str> = block.lines().map(str::trim).collect();
        if lines.iter().all(|l| l.starts_with("- ")) {
            html.push_str("<ul>\n");
            for line in lines {
                html.push_str(&format!("<li>{}</li>\n", inline_html(&line[2..])));
            }
            html.push_str("</ul>\n");
            continue;
        }
        html.push_str(&format!("<p>{}</p>\n", inline_html(&lines.join(" "))));
    }
    html
}

/// Standalone HTML page with inline CSS.
pub fn render_document(title: &str, text: &str, metadata: &BTreeMap<String, Value>) -> String {
    let body = markup_to_html(&render_markup(title, text, metadata));
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\" />\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n\
         <title>{}</title>\n<style>\n{DOCUMENT_CSS}</style>\n</head>\n<body>\n<article>\n{body}</article>\n</body>\n</html>\n",
        escape_html(title)
    )
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

const ELLIPSIS: char = '…';

/// Plain text bounded to `limit` characters. Over-long text is cut at the
/// last sentence end in the second half of the budget, else at a word.
pub fn render_message(title: &str, text: &str, limit: usize) -> String {
    let body = text
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    let full = format!("{title}\n\n{body}");
    if full.chars().count() <= limit {
        return full;
    }
    if limit == 0 {
        return String::new();
    }

    let budget = limit - 1;
    let head: String = full.chars().take(budget).collect();
    let sentence_cut = head
        .char_indices()
        .filter(|&(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&end| head[..end].chars().count() * 2 >= budget)
        .last();
    let cut = sentence_cut
        .or_else(|| head.rfind(char::is_whitespace))
        .unwrap_or(head.len());

    let mut out = head[..cut].trim_end().to_string();
    out.push(ELLIPSIS);
    out
}

// ---------------------------------------------------------------------------
// Structured
// ---------------------------------------------------------------------------

/// Pretty JSON with title, text, metadata, analysis and editing detail.
pub fn render_structured(input: &RenderInput<'_>) -> String {
    let doc = json!({
        "title": input.title,
        "text": input.text,
        "metadata": input.metadata,
        "analysis": input.analysis,
        "editing": input.editing,
    });
    serde_json::to_string_pretty(&doc).unwrap_or_else(|_| doc.to_string())
}
