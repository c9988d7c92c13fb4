//! Quality scoring: style, factual accuracy, readability.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use stagecraft_shared::{EventRecord, IncidentKind, QualityScores, StyleProfile, Tense, Voice};

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex"));
static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

const FIRST_PERSON: &[&str] = &["i", "me", "my", "mine", "myself", "i'm", "i'd", "i'll", "i've"];
const PAST_MARKERS: &[&str] = &["was", "were", "had", "did", "went", "rode", "took", "began"];
const PRESENT_MARKERS: &[&str] = &["is", "are", "has", "does", "am", "goes", "rides", "takes"];

const TECHNICAL_TERMS: &[&str] = &[
    "watts", "watt", "power", "normalized", "cadence", "rpm", "bpm", "threshold", "ftp",
    "intensity", "km", "kilometre", "kilometres", "gradient", "peloton", "echelon", "breakaway",
    "domestique", "grupetto", "gap", "sprint", "attack", "wheel", "wheels", "climb", "descent",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "into", "were", "they", "their", "there",
    "then", "than", "have", "when", "while", "which", "what", "been", "over", "after", "before",
    "still", "just", "only", "every", "about",
];

/// Readable sentence length range, in words.
const SENTENCE_WORDS: (f64, f64) = (8.0, 25.0);

/// Facts the draft failed to state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingFacts {
    pub stage: bool,
    pub winner: bool,
    pub route: bool,
    pub incident: bool,
}

impl MissingFacts {
    pub fn any(&self) -> bool {
        self.stage || self.winner || self.route || self.incident
    }

    /// Missing facts that disqualify a draft when a better one exists.
    pub fn critical(&self) -> usize {
        usize::from(self.winner)
    }
}

/// Scores plus the issues behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub scores: QualityScores,
    pub issues: Vec<String>,
    pub missing: MissingFacts,
}

impl Assessment {
    pub fn passes(&self, threshold: f64) -> bool {
        self.scores.min() >= threshold
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '’')
        .filter(|w| !w.is_empty())
        .map(|w| w.replace('’', "'").to_lowercase())
        .collect()
}

fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_END_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_RE
        .split(text.trim())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn contains_ci(haystack_lower: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    !needle.is_empty() && haystack_lower.contains(&needle)
}

/// `stage 4` but not `stage 14` or `stage 40`.
pub(crate) fn mentions_stage(text_lower: &str, event_number: u32) -> bool {
    [format!("stage {event_number}"), format!("stage 0{event_number}")]
        .iter()
        .any(|needle| {
            text_lower.match_indices(needle.as_str()).any(|(idx, m)| {
                let before_ok = text_lower[..idx]
                    .chars()
                    .next_back()
                    .is_none_or(|c| !c.is_alphanumeric());
                let after_ok = text_lower[idx + m.len()..]
                    .chars()
                    .next()
                    .is_none_or(|c| !c.is_ascii_digit());
                before_ok && after_ok
            })
        })
}

// ---------------------------------------------------------------------------
// Dimensions
// ---------------------------------------------------------------------------

fn voice_score(words: &[String], voice: Voice) -> (f64, Option<String>) {
    if words.is_empty() {
        return (0.0, Some("text is empty".into()));
    }
    let first = words
        .iter()
        .filter(|w| FIRST_PERSON.contains(&w.as_str()))
        .count();
    let per_hundred = first as f64 * 100.0 / words.len() as f64;
    match voice {
        Voice::FirstPerson => {
            let score = (per_hundred / 2.0).min(1.0);
            let issue = (score < 1.0)
                .then(|| "voice: tell the story in the first person, as the rider".to_string());
            (score, issue)
        }
        Voice::ThirdPerson => {
            let score = (1.0 - (per_hundred - 0.5).max(0.0) / 2.0).clamp(0.0, 1.0);
            let issue = (score < 1.0)
                .then(|| "voice: keep to the third person, the rider is not the narrator".to_string());
            (score, issue)
        }
    }
}

fn tense_score(words: &[String], tense: Tense) -> (f64, Option<String>) {
    let past = words
        .iter()
        .filter(|w| PAST_MARKERS.contains(&w.as_str()) || (w.len() >= 5 && w.ends_with("ed")))
        .count();
    let present = words
        .iter()
        .filter(|w| PRESENT_MARKERS.contains(&w.as_str()))
        .count();
    let total = past + present;
    if total == 0 {
        return (0.8, None);
    }
    let (target, label) = match tense {
        Tense::Past => (past, "past"),
        Tense::Present => (present, "present"),
    };
    let share = target as f64 / total as f64;
    let score = (share / 0.75).min(1.0);
    let issue = (score < 1.0).then(|| format!("tense: keep the narration in the {label} tense"));
    (score, issue)
}

fn density_score(words: &[String], (lo, hi): (f64, f64)) -> (f64, Option<String>) {
    if words.is_empty() {
        return (0.0, None);
    }
    let technical = words
        .iter()
        .filter(|w| TECHNICAL_TERMS.contains(&w.as_str()))
        .count();
    let density = technical as f64 / words.len() as f64;
    if density < lo {
        let score = 1.0 - 0.5 * (lo - density) / lo;
        (score, Some("style: use more race and power vocabulary".into()))
    } else if density > hi {
        let score = (1.0 - (density - hi) / hi.max(0.01)).max(0.0);
        (score, Some("style: too much technical vocabulary for this style".into()))
    } else {
        (1.0, None)
    }
}

/// Voice, tense, and technical density against the style profile.
pub fn style_score(text: &str, profile: &StyleProfile) -> (f64, Vec<String>) {
    let words = words(text);
    let parts = [
        voice_score(&words, profile.voice),
        tense_score(&words, profile.tense),
        density_score(&words, profile.technical_density),
    ];
    let score = parts.iter().map(|(s, _)| s).sum::<f64>() / parts.len() as f64;
    let issues = parts.into_iter().filter_map(|(_, issue)| issue).collect();
    (score, issues)
}

/// Stage identifier, winner, route city, and a key incident.
pub fn factual_score(text: &str, event: &EventRecord) -> (f64, MissingFacts, Vec<String>) {
    let lower = text.to_lowercase();
    let mut missing = MissingFacts::default();
    let mut checks = 0usize;
    let mut issues = Vec::new();

    checks += 1;
    if !mentions_stage(&lower, event.event_number) {
        missing.stage = true;
        issues.push(format!("facts: name {}", event.display_name()));
    }

    if event.winner_known() {
        checks += 1;
        let surname = event
            .winner
            .split_whitespace()
            .last()
            .filter(|s| s.chars().count() >= 3);
        let named = contains_ci(&lower, &event.winner) || surname.is_some_and(|s| contains_ci(&lower, s));
        if !named {
            missing.winner = true;
            issues.push(format!("facts: the stage winner, {}, is never named", event.winner));
        }
    }

    let mut cities: Vec<&str> = event.start_city().into_iter().chain(event.finish_city()).collect();
    let generic_route = {
        let r = event.route.to_lowercase();
        r.starts_with("event ") || r.starts_with("stage ")
    };
    if cities.is_empty() && !generic_route {
        cities.push(event.route.as_str());
    }
    if !cities.is_empty() {
        checks += 1;
        if !cities.iter().any(|c| contains_ci(&lower, c)) {
            missing.route = true;
            issues.push(format!("facts: place the story on the route ({})", event.route));
        }
    }

    let key_incidents: Vec<_> = event
        .incidents
        .iter()
        .filter(|i| !matches!(i.kind, IncidentKind::Finish))
        .collect();
    if !key_incidents.is_empty() {
        checks += 1;
        let present = key_incidents.iter().any(|i| {
            (i.kind != IncidentKind::Other && lower.contains(i.kind.as_str()))
                || i.riders.iter().any(|r| contains_ci(&lower, r))
                || significant_words(&i.description)
                    .iter()
                    .any(|w| lower.contains(w.as_str()))
        });
        if !present {
            missing.incident = true;
            issues.push("facts: none of the stage's key moments appear".into());
        }
    }

    let failed = [missing.stage, missing.winner, missing.route, missing.incident]
        .into_iter()
        .filter(|m| *m)
        .count();
    let score = (checks - failed) as f64 / checks as f64;
    (score, missing, issues)
}

fn significant_words(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 6 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Paragraph count, sentence-length distribution, repeated words.
pub fn readability_score(text: &str) -> (f64, Vec<String>) {
    let mut issues = Vec::new();

    let paragraph_count = paragraphs(text).len();
    let paragraph_score = match paragraph_count {
        0 => 0.0,
        1 => 0.4,
        2 => 0.7,
        _ => 1.0,
    };
    if paragraph_count < 3 {
        issues.push(format!(
            "readability: {paragraph_count} paragraph(s), break the story into at least three"
        ));
    }

    let lengths: Vec<f64> = sentences(text)
        .iter()
        .map(|s| s.split_whitespace().count() as f64)
        .collect();
    let sentence_score = if lengths.is_empty() {
        0.0
    } else {
        let mean = lengths.iter().sum::<f64>() / lengths.len() as f64;
        let long_share =
            lengths.iter().filter(|&&l| l > 40.0).count() as f64 / lengths.len() as f64;
        let mean_score = if mean < SENTENCE_WORDS.0 {
            mean / SENTENCE_WORDS.0
        } else if mean > SENTENCE_WORDS.1 {
            (SENTENCE_WORDS.1 / mean).powi(2)
        } else {
            1.0
        };
        if mean_score < 1.0 {
            issues.push(format!(
                "readability: average sentence is {mean:.0} words, aim for {:.0}-{:.0}",
                SENTENCE_WORDS.0, SENTENCE_WORDS.1
            ));
        }
        if long_share > 0.0 {
            issues.push("readability: split sentences longer than 40 words".into());
        }
        (mean_score - long_share).max(0.0)
    };

    let words = words(text);
    let limit = (words.len() / 40).max(4);
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in words
        .iter()
        .filter(|w| w.chars().count() >= 5 && !STOPWORDS.contains(&w.as_str()))
    {
        *counts.entry(w.as_str()).or_default() += 1;
    }
    let mut overused: Vec<&str> = counts
        .into_iter()
        .filter(|(_, n)| *n > limit)
        .map(|(w, _)| w)
        .collect();
    overused.sort_unstable();
    let repetition_score = (1.0 - 0.15 * overused.len() as f64).max(0.0);
    if !overused.is_empty() {
        issues.push(format!("readability: repeated words: {}", overused.join(", ")));
    }

    let score = (paragraph_score + sentence_score + repetition_score) / 3.0;
    (score, issues)
}

/// Score one text on all three dimensions.
pub fn assess(text: &str, profile: &StyleProfile, event: &EventRecord) -> Assessment {
    let (style, mut issues) = style_score(text, profile);
    let (factual_accuracy, missing, factual_issues) = factual_score(text, event);
    let (readability, readability_issues) = readability_score(text);
    issues.extend(factual_issues);
    issues.extend(readability_issues);

    let round = |v: f64| (v.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;
    Assessment {
        scores: QualityScores {
            style: round(style),
            factual_accuracy: round(factual_accuracy),
            readability: round(readability),
        },
        issues,
        missing,
    }
}
