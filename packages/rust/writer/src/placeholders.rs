//! Placeholder substitution for generated prose.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use stagecraft_shared::AnalysisResult;

static BRACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{?\s*([A-Za-z_ ]+?)\s*\}?\}").expect("valid regex"));
static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*([A-Z][A-Z_ ]*?)\s*\]").expect("valid regex"));
static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+([.,;:!?])").expect("valid regex"));
static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

/// Literal values that may replace a placeholder.
#[derive(Debug, Clone)]
pub struct PlaceholderValues {
    pub winner: String,
    pub stage: String,
    pub route: String,
    pub rider: String,
    pub team: String,
    pub role: String,
}

impl PlaceholderValues {
    pub fn from_analysis(analysis: &AnalysisResult, rider: &str) -> Self {
        let event = &analysis.event;
        Self {
            winner: if event.winner_known() {
                event.winner.clone()
            } else {
                "the stage winner".into()
            },
            stage: event.display_name(),
            route: event.route.clone(),
            rider: rider.to_string(),
            team: if event.team_known() {
                event.winning_team.clone()
            } else {
                "the winning team".into()
            },
            role: analysis.role.role.as_str().replace('_', " "),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        let key = key.trim().to_ascii_lowercase().replace(' ', "_");
        match key.as_str() {
            "winner" | "stage_winner" => Some(&self.winner),
            "stage" | "stage_name" | "event" => Some(&self.stage),
            "route" => Some(&self.route),
            "rider" | "athlete" | "name" => Some(&self.rider),
            "team" | "winning_team" => Some(&self.team),
            "role" => Some(&self.role),
            _ => None,
        }
    }
}

/// Replace `{token}` and `[TOKEN]` placeholders with literal values.
/// Unknown `{token}` braces are removed; unknown brackets are left alone.
pub fn substitute_placeholders(text: &str, values: &PlaceholderValues) -> String {
    let text = BRACE_RE.replace_all(text, |caps: &Captures<'_>| {
        values.lookup(&caps[1]).unwrap_or_default().to_string()
    });
    let text = BRACKET_RE.replace_all(&text, |caps: &Captures<'_>| {
        values
            .lookup(&caps[1])
            .map(str::to_string)
            .unwrap_or_else(|| caps[0].to_string())
    });
    let text = SPACE_BEFORE_PUNCT_RE.replace_all(&text, "$1");
    MULTI_SPACE_RE.replace_all(&text, " ").into_owned()
}
