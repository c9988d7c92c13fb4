//! Interval-to-incident mapping.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, warn};

use stagecraft_model::{GenerationFailure, GenerationRequest, TextGenerator, generate_json, tasks};
use stagecraft_shared::{
    EffortInterval, EventIncident, EventRecord, MappedPairing, Provenance, SourceActivity,
};

/// Confidence given to every index-based pairing.
pub const FALLBACK_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Deserialize)]
struct ModelPairings {
    #[serde(default)]
    pairings: Vec<ModelPairing>,
}

#[derive(Debug, Deserialize)]
struct ModelPairing {
    interval: i64,
    incident: i64,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    narrative: Option<String>,
}

const MAPPING_SYSTEM: &str = "You match an amateur rider's efforts to moments of a professional \
road race stage. Answer with a single JSON object and nothing else.";

fn mapping_prompt(activity: &SourceActivity, event: &EventRecord) -> String {
    let mut prompt = format!(
        "{} ({}, {:.1} km).\n\nRider efforts:\n",
        event.display_name(),
        event.route,
        event.distance_km
    );
    for (i, interval) in activity.intervals.iter().enumerate() {
        prompt.push_str(&format!(
            "{i}: minute {:.1}, {:.1} min, {}, {}\n",
            interval.start_minute,
            interval.duration_minutes,
            interval.kind,
            interval
                .avg_power
                .map(|p| format!("{p:.0} W"))
                .unwrap_or_else(|| "no power".into()),
        ));
    }
    prompt.push_str("\nStage incidents:\n");
    for (i, incident) in event.incidents.iter().enumerate() {
        prompt.push_str(&format!("{i}: {} - {}\n", incident.kind, incident.description));
    }
    prompt.push_str(
        "\nReturn JSON {\"pairings\": [{\"interval\": index, \"incident\": index, \
         \"confidence\": 0..1, \"narrative\": one sentence}]}. Use each effort at most once.",
    );
    prompt
}

/// Sentence tying an effort to an incident, chosen by incident keywords.
pub fn pairing_sentence(interval: &EffortInterval, incident: &EventIncident) -> String {
    let minute = interval.start_minute.round();
    let length = interval.duration_minutes.round().max(1.0);
    let text = incident.description.to_lowercase();

    if text.contains("breakaway") || text.contains("escape") || text.contains("clear") {
        format!(
            "At minute {minute}, a {length}-minute push mirrors the break going clear: {}.",
            incident.description.trim_end_matches('.')
        )
    } else if text.contains("attack") || text.contains("accelerat") {
        format!(
            "The {length}-minute surge from minute {minute} answers the attack: {}.",
            incident.description.trim_end_matches('.')
        )
    } else if text.contains("sprint") {
        format!(
            "Minute {minute} brings a {length}-minute kick, timed with the sprint: {}.",
            incident.description.trim_end_matches('.')
        )
    } else if text.contains("crash") || text.contains("fell") {
        format!(
            "From minute {minute} the pace stays high for {length} minutes as the race reacts to the crash: {}.",
            incident.description.trim_end_matches('.')
        )
    } else {
        format!(
            "From minute {minute}, {length} minutes of {} effort line up with this moment: {}.",
            interval.kind,
            incident.description.trim_end_matches('.')
        )
    }
}

/// Sorted intervals paired to sorted incidents by index.
pub fn fallback_pairings(
    intervals: &[EffortInterval],
    incidents: &[EventIncident],
    distance_km: f64,
) -> Vec<MappedPairing> {
    let mut interval_order: Vec<usize> = (0..intervals.len()).collect();
    interval_order.sort_by(|&a, &b| {
        intervals[a]
            .start_minute
            .total_cmp(&intervals[b].start_minute)
    });
    let mut incident_order: Vec<usize> = (0..incidents.len()).collect();
    incident_order.sort_by(|&a, &b| {
        incidents[a]
            .position
            .fraction(distance_km)
            .total_cmp(&incidents[b].position.fraction(distance_km))
    });

    interval_order
        .into_iter()
        .zip(incident_order)
        .map(|(i, j)| MappedPairing {
            interval_index: i,
            incident_index: j,
            interval: intervals[i].clone(),
            incident: incidents[j].clone(),
            confidence: FALLBACK_CONFIDENCE,
            narrative: pairing_sentence(&intervals[i], &incidents[j]),
            provenance: Provenance::Fallback,
        })
        .collect()
}

/// Keep in-range indices, one pairing per interval, confidences clamped.
fn validate_pairings(
    raw: Vec<ModelPairing>,
    intervals: &[EffortInterval],
    incidents: &[EventIncident],
) -> Vec<MappedPairing> {
    let mut seen = HashSet::new();
    let mut pairings: Vec<MappedPairing> = raw
        .into_iter()
        .filter_map(|p| {
            let i = usize::try_from(p.interval).ok().filter(|&i| i < intervals.len())?;
            let j = usize::try_from(p.incident).ok().filter(|&j| j < incidents.len())?;
            if !seen.insert(i) {
                return None;
            }
            let confidence = p
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(FALLBACK_CONFIDENCE);
            let narrative = p
                .narrative
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| pairing_sentence(&intervals[i], &incidents[j]));
            Some(MappedPairing {
                interval_index: i,
                incident_index: j,
                interval: intervals[i].clone(),
                incident: incidents[j].clone(),
                confidence,
                narrative,
                provenance: Provenance::Model,
            })
        })
        .collect();
    pairings.sort_by(|a, b| a.interval.start_minute.total_cmp(&b.interval.start_minute));
    pairings
}

/// Pair the ride's intervals with the stage's incidents, model first.
pub async fn map_intervals(
    generator: &dyn TextGenerator,
    activity: &SourceActivity,
    event: &EventRecord,
) -> Vec<MappedPairing> {
    if activity.intervals.is_empty() || event.incidents.is_empty() {
        return Vec::new();
    }

    let request = GenerationRequest::new(
        tasks::MAP_INTERVALS,
        MAPPING_SYSTEM,
        mapping_prompt(activity, event),
    );
    match generate_json::<ModelPairings>(generator, request).await {
        Ok(parsed) => {
            let pairings = validate_pairings(parsed.pairings, &activity.intervals, &event.incidents);
            if !pairings.is_empty() {
                debug!(count = pairings.len(), "model pairings accepted");
                return pairings;
            }
            warn!("model returned no valid pairings, pairing by index");
        }
        Err(GenerationFailure::Disabled) => {}
        Err(e) => warn!(error = %e, "interval mapping failed, pairing by index"),
    }

    fallback_pairings(&activity.intervals, &event.incidents, event.distance_km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{activity, event};
    use stagecraft_model::{DisabledGenerator, ScriptedGenerator};
    use stagecraft_shared::Category;

    #[tokio::test]
    async fn fallback_pairs_by_index() {
        let activity = activity(130.0);
        let event = event(Category::Mountain);
        let pairings = map_intervals(&DisabledGenerator, &activity, &event).await;

        assert_eq!(pairings.len(), activity.intervals.len().min(event.incidents.len()));
        for (n, p) in pairings.iter().enumerate() {
            assert_eq!(p.interval_index, n);
            assert_eq!(p.incident_index, n);
            assert_eq!(p.confidence, FALLBACK_CONFIDENCE);
            assert_eq!(p.provenance, Provenance::Fallback);
        }
        assert!(pairings[0].narrative.contains("break going clear"));
    }

    #[tokio::test]
    async fn model_pairings_are_validated() {
        let activity = activity(130.0);
        let event = event(Category::Mountain);
        let generator = ScriptedGenerator::new().with_response(
            tasks::MAP_INTERVALS,
            r#"{"pairings": [
                {"interval": 1, "incident": 2, "confidence": 1.7, "narrative": "Holding the wheels."},
                {"interval": 1, "incident": 0, "confidence": 0.4},
                {"interval": 9, "incident": 0, "confidence": 0.9},
                {"interval": 0, "incident": -1, "confidence": 0.9},
                {"interval": 0, "incident": 0, "confidence": -0.3}
            ]}"#,
        );
        let pairings = map_intervals(&generator, &activity, &event).await;

        assert_eq!(pairings.len(), 2);
        assert!(pairings.iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
        assert_eq!(pairings[0].interval_index, 0);
        assert_eq!(pairings[0].confidence, 0.0);
        assert!(!pairings[0].narrative.is_empty());
        assert_eq!(pairings[1].confidence, 1.0);
        assert_eq!(pairings[1].narrative, "Holding the wheels.");
    }

    #[tokio::test]
    async fn nothing_to_pair() {
        let mut activity = activity(30.0);
        activity.intervals.clear();
        let pairings = map_intervals(&DisabledGenerator, &activity, &event(Category::Flat)).await;
        assert!(pairings.is_empty());
    }
}
