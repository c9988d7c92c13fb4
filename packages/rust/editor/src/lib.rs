//! Editor Agent: scores a draft and refines it within an iteration bound.
//!
//! The loop runs draft → accepted | exhausted. Each iteration asks the model
//! for a rewrite guided by dimension-specific feedback; if that fails, a
//! deterministic repair inserts the missing facts instead. When iterations
//! run out the best draft wins, and a draft that names the stage winner is
//! always preferred over one that does not. A best draft that still omits a
//! known winner gets the winner sentence inserted before it is returned.

pub mod repair;
pub mod scoring;
pub mod terminology;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use stagecraft_model::{GenerationFailure, GenerationRequest, TextGenerator, tasks};
use stagecraft_shared::{
    AnalysisResult, EditingReport, EditorConfig, EventRecord, NarrativeDraft, Style,
    StyleProfile, Tense, Voice,
};

pub use repair::{repair_facts, repair_structure};
pub use scoring::{Assessment, MissingFacts, assess};
pub use terminology::normalize_terminology;

/// Rewrites shorter than this share of the current text are rejected.
const MIN_REWRITE_RATIO: f64 = 0.5;

#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    assessment: Assessment,
    iteration: u32,
}

impl Candidate {
    /// Fewer critical omissions first, then the weakest dimension.
    /// Ties go to the later iteration.
    fn beats(&self, other: &Candidate) -> bool {
        let (mine, theirs) = (
            self.assessment.missing.critical(),
            other.assessment.missing.critical(),
        );
        if mine != theirs {
            return mine < theirs;
        }
        self.assessment.scores.min() >= other.assessment.scores.min()
    }
}

/// Scores and refines drafts.
pub struct EditorAgent {
    generator: Arc<dyn TextGenerator>,
    config: EditorConfig,
}

impl EditorAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, config: EditorConfig) -> Self {
        Self { generator, config }
    }

    /// Run the editing loop over one draft.
    #[instrument(skip_all, fields(style = %draft.style, threshold = self.config.quality_threshold))]
    pub async fn edit(&self, draft: &NarrativeDraft, analysis: &AnalysisResult) -> EditingReport {
        let profile = draft.style.profile();
        let event = &analysis.event;
        let threshold = self.config.quality_threshold;
        let mut improvements = Vec::new();

        let (text, replaced) = normalize_terminology(&draft.text, event.category);
        if replaced > 0 {
            improvements.push(format!("terminology: {replaced} generic term(s) replaced"));
        }

        let assessment = assess(&text, profile, event);
        debug!(scores = ?assessment.scores, "initial draft scored");
        let mut current = Candidate {
            text,
            assessment,
            iteration: 0,
        };
        let mut best = current.clone();
        let mut iteration = 0;

        while !current.assessment.passes(threshold) && iteration < self.config.max_iterations {
            iteration += 1;
            let text = match self.rewrite(&current, profile, event).await {
                Ok(text) => {
                    improvements.push(format!("iteration {iteration}: model rewrite"));
                    text
                }
                Err(failure) => {
                    let (text, note) = deterministic_repair(&current, profile, event);
                    improvements.push(format!(
                        "iteration {iteration}: rewrite unavailable ({failure}), {note}"
                    ));
                    text
                }
            };

            let assessment = assess(&text, profile, event);
            debug!(iteration, scores = ?assessment.scores, "revision scored");
            current = Candidate {
                text,
                assessment,
                iteration,
            };
            if current.beats(&best) {
                best = current.clone();
            }
        }

        if best.assessment.missing.winner {
            let (text, inserted) = repair_facts(&best.text, &best.assessment.missing, event, profile);
            improvements.push(format!("final: inserted {}", inserted.join(", ")));
            best.assessment = assess(&text, profile, event);
            best.text = text;
        }

        let threshold_met = best.assessment.passes(threshold);
        info!(
            iterations = iteration,
            best_iteration = best.iteration,
            min_score = best.assessment.scores.min(),
            threshold_met,
            "editing finished"
        );

        EditingReport {
            original_text: draft.text.clone(),
            edited_text: best.text,
            scores: best.assessment.scores,
            issues: best.assessment.issues,
            improvements,
            iteration_count: iteration,
            max_iterations: self.config.max_iterations,
            quality_threshold: threshold,
            threshold_met,
            feedback_applied: false,
        }
    }

    /// One unconditional revision pass with the reader's feedback.
    #[instrument(skip_all, fields(%style))]
    pub async fn apply_feedback(
        &self,
        mut report: EditingReport,
        feedback: &str,
        analysis: &AnalysisResult,
        style: Style,
    ) -> EditingReport {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return report;
        }
        let profile = style.profile();
        let event = &analysis.event;

        let request = GenerationRequest::new(
            tasks::APPLY_FEEDBACK,
            editor_system(profile),
            format!(
                "Revise the story according to this feedback:\n{feedback}\n\n{}\n\nStory:\n{}",
                fact_sheet(event),
                report.edited_text
            ),
        );

        match self.generator.generate(&request).await {
            Ok(generation) => match clean_rewrite(&generation.text, 1) {
                Some(text) => {
                    let mut assessment = assess(&text, profile, event);
                    let mut text = text;
                    if assessment.missing.winner {
                        let (repaired, _) = repair_facts(&text, &assessment.missing, event, profile);
                        assessment = assess(&repaired, profile, event);
                        text = repaired;
                    }
                    report.edited_text = text;
                    report.threshold_met = assessment.passes(report.quality_threshold);
                    report.scores = assessment.scores;
                    report.issues = assessment.issues;
                    report.feedback_applied = true;
                    report.improvements.push("feedback: revision applied".into());
                    info!(min_score = report.scores.min(), "feedback applied");
                }
                None => {
                    warn!("feedback revision was empty, keeping edited text");
                    report
                        .improvements
                        .push("feedback: revision was empty".into());
                }
            },
            Err(e) => {
                if e != GenerationFailure::Disabled {
                    warn!(error = %e, "feedback revision failed");
                }
                report
                    .improvements
                    .push(format!("feedback: revision unavailable ({e})"));
            }
        }
        report
    }

    async fn rewrite(
        &self,
        current: &Candidate,
        profile: &StyleProfile,
        event: &EventRecord,
    ) -> Result<String, GenerationFailure> {
        let feedback = build_feedback(&current.assessment);
        let request = GenerationRequest::new(
            tasks::REWRITE_DRAFT,
            editor_system(profile),
            format!(
                "Rewrite the story to fix these problems:\n{feedback}\n\n{}\n\nStory:\n{}",
                fact_sheet(event),
                current.text
            ),
        );
        let generation = self.generator.generate(&request).await?;
        let min_words = current.text.split_whitespace().count() as f64 * MIN_REWRITE_RATIO;
        clean_rewrite(&generation.text, min_words.ceil() as usize)
            .ok_or_else(|| GenerationFailure::Parse("rewrite empty or truncated".into()))
    }
}

/// Fact repair, then structural repair when the facts are already there.
fn deterministic_repair(
    current: &Candidate,
    profile: &StyleProfile,
    event: &EventRecord,
) -> (String, String) {
    let missing = current.assessment.missing;
    let (mut text, inserted) = if missing.any() {
        repair_facts(&current.text, &missing, event, profile)
    } else {
        (current.text.clone(), Vec::new())
    };
    let mut notes = Vec::new();
    if !inserted.is_empty() {
        notes.push(format!("inserted {}", inserted.join(", ")));
    }
    if let Some(restructured) = repair_structure(&text) {
        text = restructured;
        notes.push("split into paragraphs".to_string());
    }
    let note = if notes.is_empty() {
        "nothing to repair".to_string()
    } else {
        notes.join("; ")
    };
    (text, note)
}

/// One feedback line per issue, grouped by dimension.
pub fn build_feedback(assessment: &Assessment) -> String {
    let scores = &assessment.scores;
    let mut lines = vec![format!(
        "Scores: style {:.2}, facts {:.2}, readability {:.2}.",
        scores.style, scores.factual_accuracy, scores.readability
    )];
    lines.extend(assessment.issues.iter().map(|issue| format!("- {issue}")));
    lines.join("\n")
}

fn editor_system(profile: &StyleProfile) -> String {
    let voice = match profile.voice {
        Voice::FirstPerson => "first person",
        Voice::ThirdPerson => "third person",
    };
    let tense = match profile.tense {
        Tense::Past => "past",
        Tense::Present => "present",
    };
    format!(
        "You are a cycling magazine editor. Keep the story in the {voice}, {tense} tense, \
         tone: {}. Return only the revised story as plain paragraphs.",
        profile.tone
    )
}

fn fact_sheet(event: &EventRecord) -> String {
    format!(
        "Facts to keep: {} ({}), winner {}, {:.1} km, {}.",
        event.display_name(),
        event.route,
        event.winner,
        event.distance_km,
        event.category
    )
}

/// Strip code fences; `None` when fewer than `min_words` remain.
fn clean_rewrite(text: &str, min_words: usize) -> Option<String> {
    let cleaned: Vec<&str> = text
        .trim()
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    let cleaned = cleaned.join("\n").trim().to_string();
    let words = cleaned.split_whitespace().count();
    (words > 0 && words >= min_words).then_some(cleaned)
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, Utc};
    use stagecraft_shared::{
        AnalysisResult, Category, EffortLevel, EffortProfile, EventIncident, EventRecord,
        IncidentKind, IntensityZone, NarrativeTimeline, Provenance, RacePosition, RoleAssignment,
        RoleTag, SourceActivity,
    };

    pub fn event() -> EventRecord {
        let incident = |km: f64, kind: IncidentKind, description: &str| EventIncident {
            position: RacePosition::Km(km),
            kind,
            description: description.into(),
            riders: Vec::new(),
        };
        EventRecord {
            event_number: 4,
            route: "Amiens › Rouen".into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 8).unwrap(),
            distance_km: 174.2,
            category: Category::Hilly,
            winner: "Tadej Pogačar".into(),
            winning_team: "UAE Team Emirates XRG".into(),
            weather: None,
            incidents: vec![
                incident(12.0, IncidentKind::Breakaway, "Five riders form the breakaway"),
                incident(174.2, IncidentKind::Finish, "Pogačar wins solo"),
            ],
            top_results: Vec::new(),
            source_url: None,
        }
    }

    pub fn analysis() -> AnalysisResult {
        AnalysisResult {
            activity: SourceActivity {
                id: 1,
                name: "Ride".into(),
                description: None,
                start_time: Utc::now(),
                duration_minutes: 95.0,
                distance_km: 48.0,
                avg_power: Some(200.0),
                max_power: None,
                normalized_power: Some(215.0),
                avg_heart_rate: None,
                max_heart_rate: None,
                avg_cadence: None,
                intervals: Vec::new(),
                intervals_provenance: Provenance::Fallback,
            },
            event: event(),
            profile: EffortProfile {
                normalized_power: Some(215.0),
                threshold_power: 250.0,
                intensity_ratio: 0.86,
                load_score: 117.1,
                zone: IntensityZone::Tempo,
                effort_level: EffortLevel::Moderate,
                high_effort_count: 0,
            },
            role: RoleAssignment {
                role: RoleTag::Peloton,
                position: "main_field".into(),
                tactical_description: "Rides within the bunch.".into(),
                effort_level: EffortLevel::Moderate,
                provenance: Provenance::Fallback,
            },
            pairings: Vec::new(),
            performance: BTreeMap::new(),
            timeline: NarrativeTimeline::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_model::{DisabledGenerator, ScriptedGenerator};
    use stagecraft_shared::Provenance;

    fn config(threshold: f64, max_iterations: u32) -> EditorConfig {
        EditorConfig {
            quality_threshold: threshold,
            max_iterations,
        }
    }

    fn draft(text: &str, style: Style) -> NarrativeDraft {
        NarrativeDraft {
            text: text.into(),
            style,
            provenance: Provenance::Fallback,
        }
    }

    const NO_WINNER: &str = "The main group rolled out of Amiens under a warm sun for Stage 4. \
        Early on, five riders went clear in the breakaway and the gap grew quickly. \
        The rider sat in the wheels and waited for the road to tilt. \
        Near Rouen the pace rose and the bunch strung out along the river.";

    #[tokio::test]
    async fn missing_winner_is_repaired_within_bound() {
        let editor = EditorAgent::new(Arc::new(DisabledGenerator), config(0.9, 2));
        let analysis = tests_support::analysis();
        let report = editor
            .edit(&draft(NO_WINNER, Style::Reportage), &analysis)
            .await;

        assert!(report.iteration_count >= 1);
        assert!(report.iteration_count <= 2);
        assert!(report.edited_text.contains("Tadej Pogačar"));
        assert_eq!(report.original_text, NO_WINNER);
        assert!(report.improvements.iter().any(|i| i.starts_with("terminology")));
        assert!(report.improvements.iter().any(|i| i.contains("inserted") && i.contains("winner")));
        assert!(!report.edited_text.contains("main group"));
    }

    #[tokio::test]
    async fn zero_iterations_still_reports() {
        let editor = EditorAgent::new(Arc::new(DisabledGenerator), config(0.9, 0));
        let report = editor
            .edit(&draft(NO_WINNER, Style::Reportage), &tests_support::analysis())
            .await;
        assert_eq!(report.iteration_count, 0);
        assert!(!report.edited_text.is_empty());
        assert!(report.edited_text.contains("Tadej Pogačar"));
    }

    #[tokio::test]
    async fn model_rewrites_without_winner_are_repaired() {
        let rewrite = "Stage 4 left Amiens under a warm sun and the bunch settled in quickly.\n\n\
            Five riders went clear in the breakaway and built a gap of three minutes on the road.\n\n\
            Near Rouen the favourites raced hard and the rider finished with the main field.";
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_response(tasks::REWRITE_DRAFT, rewrite)
                .with_response(tasks::REWRITE_DRAFT, rewrite),
        );
        let editor = EditorAgent::new(generator.clone(), config(0.9, 2));
        let report = editor
            .edit(&draft(NO_WINNER, Style::Reportage), &tests_support::analysis())
            .await;

        assert!(report.iteration_count >= 1);
        assert!(report.iteration_count <= 2);
        assert!(generator.calls(tasks::REWRITE_DRAFT) >= 1);
        assert!(report.edited_text.contains("Tadej Pogačar"));
        assert!(report.improvements.iter().any(|i| i.starts_with("final: inserted")));
    }

    #[tokio::test]
    async fn best_draft_keeps_the_winner() {
        let with_winner = "Stage 4 left Amiens. Pogačar won in Rouen after the breakaway was caught.";
        let polished_without_winner = "Stage 4 left Amiens under a warm sun and the bunch settled in quickly.\n\n\
            The breakaway went early and built a gap of three minutes on the road to Rouen.\n\n\
            The favourites raced hard in the last hour and the rider finished with the main field.";
        let generator = ScriptedGenerator::new()
            .with_response(tasks::REWRITE_DRAFT, polished_without_winner);
        let editor = EditorAgent::new(Arc::new(generator), config(0.99, 1));
        let report = editor
            .edit(&draft(with_winner, Style::Reportage), &tests_support::analysis())
            .await;

        assert_eq!(report.iteration_count, 1);
        assert!(!report.threshold_met);
        assert_eq!(report.edited_text, with_winner);
        assert!(report.improvements.iter().any(|i| i.contains("model rewrite")));
    }

    #[tokio::test]
    async fn good_rewrite_is_accepted() {
        let rewrite = "Stage 4 left Amiens under a warm sun and the peloton settled in quickly.\n\n\
            Five riders went clear in the breakaway and built a gap of three minutes on the road.\n\n\
            In Rouen Tadej Pogačar won the stage while the rider finished safely in the bunch.";
        let generator = ScriptedGenerator::new().with_response(tasks::REWRITE_DRAFT, rewrite);
        let editor = EditorAgent::new(Arc::new(generator), config(0.8, 2));
        let report = editor
            .edit(&draft(NO_WINNER, Style::Reportage), &tests_support::analysis())
            .await;

        assert_eq!(report.iteration_count, 1);
        assert_eq!(report.edited_text, rewrite);
        assert!(report.threshold_met);
    }

    #[tokio::test]
    async fn feedback_pass_runs_once() {
        let revised = "Stage 4 began in Amiens.\n\nThe breakaway went early.\n\nTadej Pogačar won in Rouen.";
        let generator =
            Arc::new(ScriptedGenerator::new().with_response(tasks::APPLY_FEEDBACK, revised));
        let editor = EditorAgent::new(generator.clone(), config(0.9, 0));
        let analysis = tests_support::analysis();
        let report = editor
            .edit(&draft(NO_WINNER, Style::Reportage), &analysis)
            .await;
        let report = editor
            .apply_feedback(report, "Shorter, please.", &analysis, Style::Reportage)
            .await;

        assert!(report.feedback_applied);
        assert_eq!(report.edited_text, revised);
        assert_eq!(generator.calls(tasks::APPLY_FEEDBACK), 1);
        assert!(generator.requests()[0].prompt.contains("Shorter, please."));
    }
}
