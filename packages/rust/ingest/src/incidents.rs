//! Stage incident timeline: model extraction with a positional fallback.

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use stagecraft_model::{GenerationFailure, GenerationRequest, TextGenerator, generate_json, tasks};
use stagecraft_shared::{Category, EventIncident, IncidentKind, Provenance, RacePosition};

use crate::text::ReportText;

/// Stages up to this number are treated as early in the race.
const EARLY_STAGE_MAX: u32 = 7;

/// Stages from this number on are treated as late in the race.
const LATE_STAGE_MIN: u32 = 15;

const PROMPT_TEXT_LIMIT: usize = 12_000;

/// Maximum incidents accepted from the model.
const MAX_INCIDENTS: usize = 12;

/// What the incident extractor needs to know about the stage.
#[derive(Debug, Clone)]
pub struct IncidentContext<'a> {
    pub event_number: u32,
    pub distance_km: f64,
    pub category: Category,
    pub winner: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModelIncidents {
    #[serde(default)]
    incidents: Vec<ModelIncident>,
}

#[derive(Debug, Deserialize)]
struct ModelIncident {
    #[serde(default)]
    km: Option<f64>,
    #[serde(default)]
    minute: Option<f64>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    riders: Vec<String>,
}

const INCIDENT_SYSTEM: &str = "You list the notable moments of a professional cycling stage from its report. \
Answer with a single JSON object and nothing else.";

fn incident_prompt(report: &ReportText, ctx: &IncidentContext<'_>) -> String {
    let text: String = report.text.chars().take(PROMPT_TEXT_LIMIT).collect();
    format!(
        "Stage {n}, {d:.1} km, {c}.\n\
         Return JSON {{\"incidents\": [{{\"km\": number or null, \"minute\": number or null, \
         \"kind\": breakaway|attack|crash|sprint|climb|finish|other, \"description\": string, \
         \"riders\": [string]}}]}} in race order, at most {MAX_INCIDENTS} entries. \
         km counts from the start.\n\nReport:\n{text}",
        n = ctx.event_number,
        d = ctx.distance_km,
        c = ctx.category,
    )
}

/// Incidents for the stage, ordered by position. Never empty.
#[instrument(skip_all, fields(event_number = ctx.event_number))]
pub async fn extract_incidents(
    generator: &dyn TextGenerator,
    report: &ReportText,
    ctx: &IncidentContext<'_>,
) -> (Vec<EventIncident>, Provenance) {
    let request =
        GenerationRequest::new(tasks::EXTRACT_INCIDENTS, INCIDENT_SYSTEM, incident_prompt(report, ctx));

    match generate_json::<ModelIncidents>(generator, request).await {
        Ok(parsed) => {
            let incidents = validate_incidents(parsed.incidents, ctx.distance_km);
            if !incidents.is_empty() {
                debug!(count = incidents.len(), "model incidents accepted");
                return (incidents, Provenance::Model);
            }
            warn!("model returned no usable incidents, using positional fallback");
        }
        Err(GenerationFailure::Disabled) => {}
        Err(e) => warn!(error = %e, "incident extraction failed, using positional fallback"),
    }

    (fallback_incidents(ctx), Provenance::Fallback)
}

/// Drop unpositioned or empty entries, clamp into the stage, sort by position.
fn validate_incidents(raw: Vec<ModelIncident>, distance_km: f64) -> Vec<EventIncident> {
    let mut incidents: Vec<EventIncident> = raw
        .into_iter()
        .filter(|i| !i.description.trim().is_empty())
        .filter_map(|i| {
            let position = match (i.km, i.minute) {
                (Some(km), _) if km.is_finite() && km >= 0.0 => {
                    RacePosition::Km(km.min(distance_km))
                }
                (_, Some(min)) if min.is_finite() && min >= 0.0 => RacePosition::Minute(min),
                _ => return None,
            };
            let kind = i
                .kind
                .as_deref()
                .and_then(|k| k.parse::<IncidentKind>().ok())
                .unwrap_or_else(|| IncidentKind::from_keywords(&i.description));
            Some(EventIncident {
                position,
                kind,
                description: i.description.trim().to_string(),
                riders: i
                    .riders
                    .into_iter()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect(),
            })
        })
        .take(MAX_INCIDENTS)
        .collect();

    incidents.sort_by(|a, b| {
        a.position
            .fraction(distance_km)
            .total_cmp(&b.position.fraction(distance_km))
    });
    incidents
}

/// Rule-based incidents keyed by the stage's place in the race.
pub fn fallback_incidents(ctx: &IncidentContext<'_>) -> Vec<EventIncident> {
    let d = ctx.distance_km.max(1.0);
    let at = |fraction: f64| RacePosition::Km((d * fraction * 10.0).round() / 10.0);
    let winner_known = !ctx.winner.trim().is_empty() && !ctx.winner.eq_ignore_ascii_case("tbd");
    let riders = |with_winner: bool| {
        if with_winner && winner_known {
            vec![ctx.winner.to_string()]
        } else {
            Vec::new()
        }
    };
    let incident = |position, kind, description: String, riders| EventIncident {
        position,
        kind,
        description,
        riders,
    };

    if ctx.category.is_time_trial() {
        return vec![
            incident(
                at(0.5),
                IncidentKind::Other,
                "Intermediate time check at the halfway point".into(),
                Vec::new(),
            ),
            incident(
                at(1.0),
                IncidentKind::Finish,
                finish_line(ctx, winner_known, "Fastest time of the day"),
                riders(true),
            ),
        ];
    }

    if ctx.event_number <= EARLY_STAGE_MAX {
        vec![
            incident(
                at(0.08),
                IncidentKind::Breakaway,
                "The day's breakaway goes clear".into(),
                Vec::new(),
            ),
            incident(
                at(0.55),
                IncidentKind::Sprint,
                "Intermediate sprint".into(),
                Vec::new(),
            ),
            incident(
                at(1.0),
                IncidentKind::Finish,
                finish_line(ctx, winner_known, "Bunch sprint finish"),
                riders(true),
            ),
        ]
    } else if ctx.event_number >= LATE_STAGE_MIN {
        vec![
            incident(
                at(0.6),
                IncidentKind::Attack,
                "The favourites start attacking".into(),
                Vec::new(),
            ),
            incident(
                at(0.85),
                IncidentKind::Climb,
                "Decisive climb splits the leaders".into(),
                Vec::new(),
            ),
            incident(
                at(1.0),
                IncidentKind::Finish,
                finish_line(ctx, winner_known, "Finish"),
                riders(true),
            ),
        ]
    } else {
        vec![
            incident(
                at(0.1),
                IncidentKind::Breakaway,
                "A strong breakaway forms".into(),
                Vec::new(),
            ),
            incident(
                at(0.7),
                IncidentKind::Attack,
                "Attacks from the bunch bring the break back".into(),
                Vec::new(),
            ),
            incident(
                at(1.0),
                IncidentKind::Finish,
                finish_line(ctx, winner_known, "Finish"),
                riders(true),
            ),
        ]
    }
}

fn finish_line(ctx: &IncidentContext<'_>, winner_known: bool, what: &str) -> String {
    if winner_known {
        format!("{what}, won by {}", ctx.winner)
    } else {
        what.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_model::{DisabledGenerator, ScriptedGenerator};

    fn ctx(n: u32, category: Category) -> IncidentContext<'static> {
        IncidentContext {
            event_number: n,
            distance_km: 180.0,
            category,
            winner: "Tadej Pogačar",
        }
    }

    fn report() -> ReportText {
        ReportText {
            text: "A long report.".into(),
            title: None,
            word_count: 3,
        }
    }

    fn kinds(incidents: &[EventIncident]) -> Vec<IncidentKind> {
        incidents.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn fallback_by_stage_position() {
        assert_eq!(
            kinds(&fallback_incidents(&ctx(3, Category::Flat))),
            vec![IncidentKind::Breakaway, IncidentKind::Sprint, IncidentKind::Finish]
        );
        assert_eq!(
            kinds(&fallback_incidents(&ctx(17, Category::Mountain))),
            vec![IncidentKind::Attack, IncidentKind::Climb, IncidentKind::Finish]
        );
        assert_eq!(
            kinds(&fallback_incidents(&ctx(10, Category::Hilly))),
            vec![IncidentKind::Breakaway, IncidentKind::Attack, IncidentKind::Finish]
        );
    }

    #[test]
    fn fallback_finish_names_known_winner() {
        let incidents = fallback_incidents(&ctx(3, Category::Flat));
        let finish = incidents.last().unwrap();
        assert!(finish.description.contains("Tadej Pogačar"));
        assert_eq!(finish.position, RacePosition::Km(180.0));

        let unknown = IncidentContext {
            winner: "TBD",
            ..ctx(3, Category::Flat)
        };
        let finish = fallback_incidents(&unknown).pop().unwrap();
        assert!(!finish.description.contains("TBD"));
        assert!(finish.riders.is_empty());
    }

    #[test]
    fn fallback_time_trial_has_no_bunch() {
        let incidents = fallback_incidents(&ctx(5, Category::TimeTrial));
        assert_eq!(kinds(&incidents), vec![IncidentKind::Other, IncidentKind::Finish]);
    }

    #[tokio::test]
    async fn model_incidents_validated_and_sorted() {
        let generator = ScriptedGenerator::new().with_response(
            tasks::EXTRACT_INCIDENTS,
            r#"{"incidents": [
                {"km": 170, "kind": "attack", "description": "Pogačar attacks", "riders": ["Tadej Pogačar"]},
                {"km": 12, "kind": "escape", "description": "Five riders escape in a breakaway"},
                {"description": "No position given", "kind": "crash"},
                {"minute": 60, "kind": "crash", "description": "Crash in the bunch"},
                {"km": 950, "kind": "finish", "description": "Finish"}
            ]}"#,
        );
        let (incidents, provenance) =
            extract_incidents(&generator, &report(), &ctx(4, Category::Hilly)).await;

        assert_eq!(provenance, Provenance::Model);
        assert_eq!(
            kinds(&incidents),
            vec![
                IncidentKind::Breakaway,
                IncidentKind::Crash,
                IncidentKind::Attack,
                IncidentKind::Finish
            ]
        );
        // Out-of-range km is clamped to the stage distance
        assert_eq!(incidents[3].position, RacePosition::Km(180.0));
    }

    #[tokio::test]
    async fn empty_model_answer_uses_fallback() {
        let generator =
            ScriptedGenerator::new().with_response(tasks::EXTRACT_INCIDENTS, r#"{"incidents": []}"#);
        let (incidents, provenance) =
            extract_incidents(&generator, &report(), &ctx(4, Category::Flat)).await;
        assert_eq!(provenance, Provenance::Fallback);
        assert_eq!(incidents.len(), 3);

        let (_, provenance) =
            extract_incidents(&DisabledGenerator, &report(), &ctx(4, Category::Flat)).await;
        assert_eq!(provenance, Provenance::Fallback);
    }
}
