//! Analysis & Mapping Agent.
//!
//! Turns one ride and one stage record into an [`AnalysisResult`]: effort
//! profile, narrative role, interval-to-incident pairings, and the beat
//! timeline the writer works from. Every model-assisted step has its own
//! deterministic fallback, so a failure degrades only that step.

pub mod effort;
pub mod mapping;
pub mod role;
pub mod timeline;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, instrument};

use stagecraft_model::TextGenerator;
use stagecraft_shared::{
    AnalysisResult, AthleteConfig, EffortProfile, EventRecord, MappedPairing, RoleAssignment,
    SourceActivity,
};

pub use effort::{HIGH_EFFORT_RATIO, effort_profile, is_high_effort};
pub use mapping::{FALLBACK_CONFIDENCE, fallback_pairings, map_intervals, pairing_sentence};
pub use role::{assign_role, fallback_role, tactical_description};
pub use timeline::build_timeline;

/// Runs the four analysis steps in order.
pub struct AnalysisAgent {
    generator: Arc<dyn TextGenerator>,
    athlete: AthleteConfig,
}

impl AnalysisAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, athlete: AthleteConfig) -> Self {
        Self { generator, athlete }
    }

    #[instrument(skip_all, fields(activity_id = activity.id, event_number = event.event_number))]
    pub async fn analyze(&self, activity: SourceActivity, event: EventRecord) -> AnalysisResult {
        let profile = effort_profile(&activity, self.athlete.threshold_power);
        let role = assign_role(self.generator.as_ref(), &event, &profile, &activity).await;
        let pairings = map_intervals(self.generator.as_ref(), &activity, &event).await;
        let timeline = build_timeline(&activity, &event, &role, &pairings);
        let performance = performance_summary(&activity, &profile, &role, &pairings);

        info!(
            role = %role.role,
            position = %role.position,
            zone = profile.zone.as_str(),
            pairings = pairings.len(),
            beats = timeline.beats.len(),
            "analysis complete"
        );

        AnalysisResult {
            activity,
            event,
            profile,
            role,
            pairings,
            performance,
            timeline,
        }
    }
}

/// Flat key → value map of the headline numbers.
pub fn performance_summary(
    activity: &SourceActivity,
    profile: &EffortProfile,
    role: &RoleAssignment,
    pairings: &[MappedPairing],
) -> BTreeMap<String, Value> {
    let mean_confidence = if pairings.is_empty() {
        Value::Null
    } else {
        let mean = pairings.iter().map(|p| p.confidence).sum::<f64>() / pairings.len() as f64;
        json!((mean * 100.0).round() / 100.0)
    };

    BTreeMap::from([
        ("duration_minutes".into(), json!(activity.duration_minutes)),
        ("distance_km".into(), json!(activity.distance_km)),
        ("avg_power".into(), json!(activity.avg_power)),
        ("normalized_power".into(), json!(profile.normalized_power)),
        ("threshold_power".into(), json!(profile.threshold_power)),
        ("intensity_ratio".into(), json!(profile.intensity_ratio)),
        ("load_score".into(), json!(profile.load_score)),
        ("zone".into(), json!(profile.zone.as_str())),
        ("effort_level".into(), json!(profile.effort_level.as_str())),
        ("avg_heart_rate".into(), json!(activity.avg_heart_rate)),
        ("max_heart_rate".into(), json!(activity.max_heart_rate)),
        ("interval_count".into(), json!(activity.intervals.len())),
        ("high_effort_count".into(), json!(profile.high_effort_count)),
        ("role".into(), json!(role.role.as_str())),
        ("mean_pairing_confidence".into(), mean_confidence),
    ])
}


#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_model::{DisabledGenerator, ScriptedGenerator, tasks};
    use stagecraft_shared::{Category, EffortLevel, Provenance, RoleTag};

    fn athlete() -> AthleteConfig {
        AthleteConfig {
            name: "Sam".into(),
            threshold_power: 250.0,
        }
    }

    #[tokio::test]
    async fn full_fallback_analysis() {
        let agent = AnalysisAgent::new(Arc::new(DisabledGenerator), athlete());
        let result = agent
            .analyze(
                tests_support::activity(130.0),
                tests_support::event(Category::Mountain),
            )
            .await;

        // NP 215 / 250 = 0.86 → tempo → moderate, 130 min
        assert_eq!(result.profile.effort_level, EffortLevel::Moderate);
        assert_eq!(result.role.role, RoleTag::Domestique);
        assert_eq!(result.role.provenance, Provenance::Fallback);
        assert_eq!(result.pairings.len(), 3);
        assert_eq!(result.timeline.beats.len(), 5);
        assert_eq!(result.performance["interval_count"], json!(3));
        assert_eq!(result.performance["mean_pairing_confidence"], json!(0.6));
        assert_eq!(result.performance["role"], json!("domestique"));
    }

    #[tokio::test]
    async fn one_failed_step_does_not_affect_others() {
        let generator = ScriptedGenerator::new()
            .with_response(tasks::ASSIGN_ROLE, "not json at all")
            .with_response(
                tasks::MAP_INTERVALS,
                r#"{"pairings": [{"interval": 2, "incident": 1, "confidence": 0.9}]}"#,
            );
        let agent = AnalysisAgent::new(Arc::new(generator), athlete());
        let result = agent
            .analyze(
                tests_support::activity(130.0),
                tests_support::event(Category::Mountain),
            )
            .await;

        assert_eq!(result.role.provenance, Provenance::Fallback);
        assert_eq!(result.pairings.len(), 1);
        assert_eq!(result.pairings[0].provenance, Provenance::Model);
        assert_eq!(result.performance["mean_pairing_confidence"], json!(0.9));
    }
}
