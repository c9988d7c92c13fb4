//! Delivery agent: title, metadata, one rendered format, optional archive.
//!
//! - [`title`]: title template and metadata map
//! - [`render`]: markup, document, message, and structured renderers
//! - [`archive`]: deterministic filenames, locked atomic writes
//! - [`season`]: season compilation over the archive

pub mod archive;
pub mod render;
pub mod season;
pub mod title;

use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument};

use stagecraft_shared::{
    AnalysisResult, AppConfig, DeliveredArtifact, DeliveryConfig, DeliveryFormat, EditingReport,
    Result, Style, expand_home,
};

pub use archive::{archive_filename, slugify, write_archive};
pub use render::{RenderInput, markup_to_html, render};
pub use season::{SeasonCompilation, compile_season};
pub use title::{build_metadata, render_title};

/// Per-run delivery choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub format: DeliveryFormat,
    pub style: Style,
    pub archive: bool,
}

impl From<&AppConfig> for DeliveryOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            format: config.defaults.format,
            style: config.defaults.style,
            archive: config.defaults.archive,
        }
    }
}

pub struct DeliveryAgent {
    config: DeliveryConfig,
    archive_dir: PathBuf,
}

impl DeliveryAgent {
    pub fn new(config: DeliveryConfig, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            archive_dir: archive_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.delivery.clone(),
            expand_home(&config.defaults.archive_dir),
        )
    }

    pub fn archive_dir(&self) -> &PathBuf {
        &self.archive_dir
    }

    /// Render `text` in the requested format and archive it if asked.
    #[instrument(skip_all, fields(event_number = analysis.event.event_number, format = options.format.as_str()))]
    pub fn deliver(
        &self,
        text: &str,
        analysis: &AnalysisResult,
        report: &EditingReport,
        options: &DeliveryOptions,
    ) -> Result<DeliveredArtifact> {
        let title = render_title(&self.config.title_template, analysis);
        let metadata = build_metadata(text, analysis, report, options.style, &self.config);

        let input = RenderInput {
            title: &title,
            text,
            metadata: &metadata,
            analysis: json!({
                "profile": analysis.profile,
                "role": analysis.role,
                "pairings": analysis.pairings,
                "timeline": analysis.timeline,
            }),
            editing: json!({
                "scores": report.scores,
                "issues": report.issues,
                "improvements": report.improvements,
                "iterations": report.iteration_count,
                "threshold_met": report.threshold_met,
                "feedback_applied": report.feedback_applied,
            }),
            message_limit: self.config.message_limit,
        };
        let content = render(options.format, &input);

        let file_path = if options.archive {
            let event = &analysis.event;
            let filename = archive_filename(event.event_number, event.date, &title, options.format);
            Some(write_archive(
                &self.archive_dir,
                event.event_number,
                event.date,
                &filename,
                &content,
            )?)
        } else {
            None
        };

        info!(
            title = %title,
            chars = content.chars().count(),
            archived = file_path.is_some(),
            "delivered"
        );

        Ok(DeliveredArtifact {
            title,
            content,
            format: options.format,
            metadata,
            file_path,
            generated_at: Utc::now(),
        })
    }

    /// Compile the archived markup stories of `season` into one document.
    pub fn compile_season(&self, label: &str, season: i32) -> Result<SeasonCompilation> {
        compile_season(&self.archive_dir, label, season)
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, Utc};
    use stagecraft_shared::{
        AnalysisResult, BeatFocus, Category, EditingReport, EffortLevel, EffortProfile,
        EventIncident, EventRecord, IncidentKind, IntensityZone, NarrativeTimeline, Provenance,
        QualityScores, RacePosition, RoleAssignment, RoleTag, SourceActivity, TimelineBeat,
    };

    pub fn analysis() -> AnalysisResult {
        let event = EventRecord {
            event_number: 4,
            route: "Amiens › Rouen".into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 8).unwrap(),
            distance_km: 174.2,
            category: Category::Hilly,
            winner: "Tadej Pogačar".into(),
            winning_team: "UAE Team Emirates XRG".into(),
            weather: None,
            incidents: vec![EventIncident {
                position: RacePosition::Km(174.2),
                kind: IncidentKind::Finish,
                description: "Pogačar wins solo in Rouen".into(),
                riders: vec!["Tadej Pogačar".into()],
            }],
            top_results: Vec::new(),
            source_url: None,
        };
        let activity = SourceActivity {
            id: 7,
            name: "Lunch ride".into(),
            description: None,
            start_time: Utc::now(),
            duration_minutes: 128.0,
            distance_km: 61.4,
            avg_power: Some(205.0),
            max_power: Some(610.0),
            normalized_power: Some(228.0),
            avg_heart_rate: Some(151.0),
            max_heart_rate: Some(183.0),
            avg_cadence: None,
            intervals: Vec::new(),
            intervals_provenance: Provenance::Fallback,
        };

        AnalysisResult {
            activity,
            event,
            profile: EffortProfile {
                normalized_power: Some(228.0),
                threshold_power: 250.0,
                intensity_ratio: 0.912,
                load_score: 177.4,
                zone: IntensityZone::Threshold,
                effort_level: EffortLevel::Hard,
                high_effort_count: 1,
            },
            role: RoleAssignment {
                role: RoleTag::ChaseGroup,
                position: "front_group".into(),
                tactical_description: "Bridges across to the leaders.".into(),
                effort_level: EffortLevel::Hard,
                provenance: Provenance::Fallback,
            },
            pairings: Vec::new(),
            performance: BTreeMap::from([("zone".to_string(), serde_json::json!("threshold"))]),
            timeline: NarrativeTimeline {
                beats: vec![TimelineBeat {
                    minute: 0.0,
                    incident: "The flag drops in Amiens for Stage 4".into(),
                    athlete_action: "Settles in.".into(),
                    focus: BeatFocus::Setup,
                }],
            },
        }
    }

    pub fn report() -> EditingReport {
        EditingReport {
            original_text: "draft".into(),
            edited_text: "edited".into(),
            scores: QualityScores {
                style: 0.91,
                factual_accuracy: 1.0,
                readability: 0.95,
            },
            issues: Vec::new(),
            improvements: vec!["terminology: 1 replacement".into()],
            iteration_count: 1,
            max_iterations: 2,
            quality_threshold: 0.9,
            threshold_met: true,
            feedback_applied: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{analysis, report};

    const TEXT: &str = "The flag dropped in Amiens.\n\nTadej Pogačar won Stage 4.";

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sc-delivery-{}", uuid::Uuid::now_v7()))
    }

    fn options(format: DeliveryFormat, archive: bool) -> DeliveryOptions {
        DeliveryOptions {
            format,
            style: Style::Reportage,
            archive,
        }
    }

    #[test]
    fn markup_without_archive() {
        let agent = DeliveryAgent::new(DeliveryConfig::default(), temp_dir());
        let artifact = agent
            .deliver(TEXT, &analysis(), &report(), &options(DeliveryFormat::Markup, false))
            .unwrap();
        assert_eq!(artifact.title, "Stage 4: Amiens › Rouen");
        assert!(artifact.content.starts_with("# Stage 4: Amiens › Rouen\n\n---\n\n"));
        assert_eq!(artifact.format, DeliveryFormat::Markup);
        assert!(artifact.file_path.is_none());
        assert!(!agent.archive_dir().exists());
        assert_eq!(artifact.metadata["style"], json!("reportage"));
    }

    #[test]
    fn archive_then_compile() {
        let dir = temp_dir();
        let agent = DeliveryAgent::new(DeliveryConfig::default(), &dir);
        let artifact = agent
            .deliver(TEXT, &analysis(), &report(), &options(DeliveryFormat::Markup, true))
            .unwrap();

        let path = artifact.file_path.clone().unwrap();
        assert!(path.starts_with(&dir));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("event_04_2025-07-08_stage-4-amiens-rouen-"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), artifact.content);

        let season = agent.compile_season("Tour 2025", 2025).unwrap();
        assert_eq!(season.stories, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn structured_recovers_key_facts() {
        let config = DeliveryConfig {
            include_scores: true,
            ..DeliveryConfig::default()
        };
        let agent = DeliveryAgent::new(config, temp_dir());
        let artifact = agent
            .deliver(TEXT, &analysis(), &report(), &options(DeliveryFormat::Structured, false))
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&artifact.content).unwrap();
        assert_eq!(parsed["metadata"]["event_number"], json!(4));
        assert_eq!(parsed["metadata"]["winner"], json!("Tadej Pogačar"));
        assert_eq!(parsed["metadata"]["role"], json!("chase_group"));
        assert_eq!(parsed["analysis"]["role"]["position"], json!("front_group"));
        assert_eq!(parsed["editing"]["iterations"], json!(1));
    }

    #[test]
    fn message_respects_limit() {
        let config = DeliveryConfig {
            message_limit: 40,
            ..DeliveryConfig::default()
        };
        let agent = DeliveryAgent::new(config, temp_dir());
        let artifact = agent
            .deliver(TEXT, &analysis(), &report(), &options(DeliveryFormat::Message, false))
            .unwrap();
        assert!(artifact.content.chars().count() <= 40);
        assert!(artifact.content.starts_with("Stage 4: Amiens › Rouen"));
    }

    #[test]
    fn document_is_html() {
        let agent = DeliveryAgent::new(DeliveryConfig::default(), temp_dir());
        let artifact = agent
            .deliver(TEXT, &analysis(), &report(), &options(DeliveryFormat::Document, false))
            .unwrap();
        assert!(artifact.content.starts_with("<!DOCTYPE html>"));
        assert!(artifact.content.contains("<p>Tadej Pogačar won Stage 4.</p>"));
    }
}
