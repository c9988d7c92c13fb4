//! Structured stage facts from report text.
//!
//! Each field is resolved independently: a validated model value first, then
//! a regex heuristic over the text, then a hard default.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use stagecraft_model::{GenerationFailure, GenerationRequest, TextGenerator, generate_json, tasks};
use stagecraft_shared::{Category, Provenance, ResultEntry};

use crate::text::ReportText;

/// Default distance when nothing better is known.
pub const DEFAULT_DISTANCE_KM: f64 = 175.0;

/// Placeholder for an unknown winner or team.
pub const UNKNOWN: &str = "TBD";

/// Report text beyond this many characters is not sent to the model.
const PROMPT_TEXT_LIMIT: usize = 12_000;

/// Maximum number of result lines kept.
const TOP_N: usize = 10;

/// Fully resolved fields (defaults applied).
#[derive(Debug, Clone)]
pub struct ExtractedFields {
    pub route: String,
    pub distance_km: f64,
    pub category: Category,
    pub winner: String,
    pub winning_team: String,
    pub weather: Option<String>,
    pub top_results: Vec<ResultEntry>,
    /// `Model` when the model answered usefully for at least one field.
    pub provenance: Provenance,
}

/// Fields found by regex heuristics; `None` where nothing matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeuristicFields {
    pub route: Option<String>,
    pub distance_km: Option<f64>,
    pub category: Option<Category>,
    pub winner: Option<String>,
    pub winning_team: Option<String>,
    pub weather: Option<String>,
    pub top_results: Vec<ResultEntry>,
}

// ---------------------------------------------------------------------------
// Model path
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ModelFields {
    #[serde(default)]
    route: Option<String>,
    #[serde(default)]
    distance_km: Option<f64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    winner: Option<String>,
    #[serde(default)]
    winning_team: Option<String>,
    #[serde(default)]
    weather: Option<String>,
    #[serde(default)]
    top_results: Vec<ModelResult>,
}

#[derive(Debug, Deserialize)]
struct ModelResult {
    rank: Option<u32>,
    rider: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    gap: Option<String>,
}

const EXTRACT_SYSTEM: &str = "You extract structured facts from professional cycling stage reports. \
Answer with a single JSON object and nothing else. Use null for anything the report does not state.";

fn extract_prompt(report: &ReportText, event_number: u32) -> String {
    let text: String = report.text.chars().take(PROMPT_TEXT_LIMIT).collect();
    format!(
        "Stage number: {event_number}\n\
         Return JSON with keys: route (\"Start > Finish\"), distance_km (number), \
         category (one of flat, hilly, mountain, time_trial, team_time_trial), winner, \
         winning_team, weather, top_results (array of {{rank, rider, team, gap}}, at most {TOP_N}).\n\n\
         Report:\n{text}"
    )
}

/// Keep a model string only if it says something.
fn meaningful(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| {
        !v.is_empty()
            && !matches!(
                v.to_ascii_lowercase().as_str(),
                "null" | "none" | "unknown" | "n/a" | "tbd"
            )
    })
}

/// Resolve every field, model first.
#[instrument(skip_all, fields(event_number = event_number))]
pub async fn extract_fields(
    generator: &dyn TextGenerator,
    report: &ReportText,
    event_number: u32,
) -> ExtractedFields {
    let request =
        GenerationRequest::new(tasks::EXTRACT_EVENT, EXTRACT_SYSTEM, extract_prompt(report, event_number));

    let model = match generate_json::<ModelFields>(generator, request).await {
        Ok(fields) => Some(fields),
        Err(GenerationFailure::Disabled) => None,
        Err(e) => {
            warn!(error = %e, "model extraction failed, using heuristics");
            None
        }
    };

    let heuristics = heuristic_fields(&report.text, report.title.as_deref());
    merge(model, heuristics, event_number)
}

fn merge(model: Option<ModelFields>, heur: HeuristicFields, event_number: u32) -> ExtractedFields {
    let m = model.unwrap_or_default();
    let mut model_used = false;
    let mut pick = |from_model: Option<String>| {
        let v = meaningful(from_model);
        model_used |= v.is_some();
        v
    };

    let route = pick(m.route)
        .or(heur.route)
        .unwrap_or_else(|| format!("Event {event_number}"));
    let winner = pick(m.winner).or(heur.winner).unwrap_or_else(|| UNKNOWN.into());
    let winning_team = pick(m.winning_team)
        .or(heur.winning_team)
        .unwrap_or_else(|| UNKNOWN.into());
    let weather = pick(m.weather).or(heur.weather);

    let category = match m.category.as_deref().map(str::parse::<Category>) {
        Some(Ok(c)) => {
            model_used = true;
            c
        }
        _ => heur.category.unwrap_or(Category::Flat),
    };

    let distance_km = match m.distance_km.filter(|d| d.is_finite() && *d > 0.0 && *d <= 400.0) {
        Some(d) => {
            model_used = true;
            d
        }
        None => heur.distance_km.unwrap_or(DEFAULT_DISTANCE_KM),
    };

    let mut model_results: Vec<ResultEntry> = m
        .top_results
        .into_iter()
        .filter_map(|r| {
            Some(ResultEntry {
                rank: r.rank.filter(|r| *r > 0)?,
                rider: meaningful(r.rider)?,
                team: meaningful(r.team),
                gap: meaningful(r.gap),
            })
        })
        .take(TOP_N)
        .collect();
    model_results.sort_by_key(|r| r.rank);
    let top_results = if model_results.is_empty() {
        heur.top_results
    } else {
        model_used = true;
        model_results
    };

    debug!(%route, %winner, %category, distance_km, model_used, "stage fields resolved");
    ExtractedFields {
        route,
        distance_km,
        category,
        winner,
        winning_team,
        weather,
        top_results,
        provenance: if model_used {
            Provenance::Model
        } else {
            Provenance::Fallback
        },
    }
}

// ---------------------------------------------------------------------------
// Heuristic path
// ---------------------------------------------------------------------------

/// Regex heuristics over clean report text.
pub fn heuristic_fields(text: &str, title: Option<&str>) -> HeuristicFields {
    let top_results = find_results(text);
    let winner = find_labelled(&WINNER_RE, text)
        .or_else(|| top_results.first().filter(|r| r.rank == 1).map(|r| r.rider.clone()))
        .or_else(|| NARRATIVE_WINNER_RE.captures(text).map(|c| c[1].trim().to_string()));
    let winning_team = find_labelled(&TEAM_RE, text)
        .or_else(|| {
            top_results
                .first()
                .filter(|r| r.rank == 1)
                .and_then(|r| r.team.clone())
        })
        .or_else(|| winner.as_deref().and_then(|w| team_after_name(text, w)));

    HeuristicFields {
        route: find_route(text).or_else(|| title.and_then(find_route)),
        distance_km: find_distance(text),
        category: find_category(text),
        winner,
        winning_team,
        weather: find_labelled(&WEATHER_RE, text),
        top_results,
    }
}

static ROUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[#*\-\s]*(?:[Ss]tage\s+\d+\s*[:»|–-]?\s*)?([^\n>›→(|]+?\s(?:>|›|→)\s[^\n(|]+?)\s*(?:\(\s*[\d.,]+\s*km\s*\))?\s*$",
    )
    .expect("valid regex")
});
static START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*start(?:\s+town)?\s*:\s*([^\n|]+)$").expect("valid regex")
});
static FINISH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*finish(?:\s+town)?\s*:\s*([^\n|]+)$").expect("valid regex")
});
static DISTANCE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)distance\s*:?\s*(\d{1,3}(?:[.,]\d{1,2})?)\s*km").expect("valid regex")
});
static DISTANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}(?:[.,]\d{1,2})?)\s*km\b").expect("valid regex")
});
static CATEGORY_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(?:stage\s+type|stage\s+profile|profile|parcours\s+type|category)\s*:\s*([a-z][a-z \-]*)")
        .expect("valid regex")
});
static WINNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*(?:stage\s+)?winner\s*:\s*([^\n(,|]+)").expect("valid regex")
});
static NARRATIVE_WINNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\p{Lu}[\p{L}'’.-]+(?:\s+(?:van|der|de|den|da|di|le|la|du|von|\p{Lu}[\p{L}'’.-]+))+)\s+(?:won|wins|takes|took|claimed|claims|soloed to|sprinted to)\s+(?:the\s+)?(?:stage|victory|win)",
    )
    .expect("valid regex")
});
static TEAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*winning\s+team\s*:\s*([^\n|]+)").expect("valid regex")
});
static WEATHER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*weather\s*:\s*([^\n]+)").expect("valid regex")
});
static LIST_RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(\d{1,2})[.)]\s+([^\n(]+?)\s*\(([^)]+)\)(?:\s+([^\n]+))?$")
        .expect("valid regex")
});

fn find_labelled(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().trim_end_matches('.').to_string())
        .filter(|v| !v.is_empty())
}

fn find_route(text: &str) -> Option<String> {
    if let Some(c) = ROUTE_RE.captures(text) {
        return Some(c[1].trim().to_string());
    }
    match (find_labelled(&START_RE, text), find_labelled(&FINISH_RE, text)) {
        (Some(start), Some(finish)) => Some(format!("{start} > {finish}")),
        _ => None,
    }
}

fn parse_km(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

/// Labelled distance, else the largest plausible km figure mentioned.
fn find_distance(text: &str) -> Option<f64> {
    if let Some(d) = DISTANCE_LABEL_RE
        .captures(text)
        .and_then(|c| parse_km(&c[1]))
        .filter(|d| *d > 0.0)
    {
        return Some(d);
    }
    DISTANCE_RE
        .captures_iter(text)
        .filter_map(|c| parse_km(&c[1]))
        .filter(|d| (5.0..=300.0).contains(d))
        .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.max(d))))
}

fn find_category(text: &str) -> Option<Category> {
    if let Some(c) = CATEGORY_LABEL_RE
        .captures(text)
        .and_then(|c| c[1].trim().parse::<Category>().ok())
    {
        return Some(c);
    }

    let lower = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(&["team time trial", "ttt"]) {
        Some(Category::TeamTimeTrial)
    } else if has(&["individual time trial", "time trial", "chrono"]) {
        Some(Category::TimeTrial)
    } else if has(&["summit finish", "mountain stage", "high mountain", "hors catégorie"]) {
        Some(Category::Mountain)
    } else if has(&["hilly", "medium mountain", "rolling terrain", "punchy"]) {
        Some(Category::Hilly)
    } else if has(&["flat stage", "bunch sprint", "sprint finish", "sprinters"]) {
        Some(Category::Flat)
    } else {
        None
    }
}

/// Rank-ordered rows from pipe tables, else from numbered list lines.
fn find_results(text: &str) -> Vec<ResultEntry> {
    let mut results: Vec<ResultEntry> = Vec::new();
    for line in text.lines().filter(|l| l.trim_start().starts_with('|')) {
        let cells: Vec<&str> = line
            .trim()
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        let Some(rank) = cells
            .first()
            .and_then(|c| c.trim_end_matches('.').parse::<u32>().ok())
        else {
            continue;
        };
        // A second table (GC, points) restarts the ranking
        if results.last().is_some_and(|prev| rank <= prev.rank) {
            break;
        }
        let Some(rider) = cells.get(1).filter(|r| !r.is_empty()) else {
            continue;
        };
        results.push(ResultEntry {
            rank,
            rider: rider.to_string(),
            team: cells.get(2).filter(|t| !t.is_empty()).map(|t| t.to_string()),
            gap: cells.get(3).filter(|g| !g.is_empty()).map(|g| normalize_gap(g)),
        });
        if results.len() == TOP_N {
            break;
        }
    }
    if !results.is_empty() {
        return results;
    }

    for caps in LIST_RESULT_RE.captures_iter(text) {
        let Ok(rank) = caps[1].parse::<u32>() else {
            continue;
        };
        if results.last().is_some_and(|prev| rank <= prev.rank) {
            break;
        }
        results.push(ResultEntry {
            rank,
            rider: caps[2].trim().to_string(),
            team: Some(caps[3].trim().to_string()),
            gap: caps.get(4).map(|g| normalize_gap(g.as_str().trim())),
        });
        if results.len() == TOP_N {
            break;
        }
    }
    results
}

/// `,,` is the same-time marker on results sites.
fn normalize_gap(gap: &str) -> String {
    if gap == ",," { "s.t.".into() } else { gap.to_string() }
}

fn team_after_name(text: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r"{}\s*\(([^)]+)\)", regex::escape(name))).ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}
