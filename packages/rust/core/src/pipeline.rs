//! End-to-end run: activity + stage report → analysis → draft → edit → delivery.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use stagecraft_analysis::AnalysisAgent;
use stagecraft_delivery::{DeliveryAgent, DeliveryOptions};
use stagecraft_editor::EditorAgent;
use stagecraft_ingest::{
    ActivityAgent, ActivitySource, EventRecordAgent, HttpReportFetcher, IngestConfig,
    ReportFetcher, StravaClient,
};
use stagecraft_model::{CachedGenerator, TextGenerator, generator_from_config};
use stagecraft_shared::{
    AnalysisResult, AppConfig, DeliveredArtifact, DeliveryFormat, EditingReport, Result,
    StagecraftError, Style, expand_home,
};
use stagecraft_storage::{RunRecord, Storage};
use stagecraft_writer::WriterAgent;

/// What to narrate and how.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub event_number: u32,
    pub date: NaiveDate,
    /// Look up the day's ride when absent.
    pub activity_id: Option<u64>,
    pub style: Style,
    pub format: DeliveryFormat,
    pub rider_context: Option<String>,
    /// One extra revision pass after editing.
    pub feedback: Option<String>,
    pub archive: bool,
}

impl RunRequest {
    /// Style, format and archive flag from the `[defaults]` section.
    pub fn with_defaults(config: &AppConfig, event_number: u32, date: NaiveDate) -> Self {
        Self {
            event_number,
            date,
            activity_id: None,
            style: config.defaults.style,
            format: config.defaults.format,
            rider_context: None,
            feedback: None,
            archive: config.defaults.archive,
        }
    }
}

/// Outcome of [`Pipeline::run`]. Failures are reported here, not as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub narrative: Option<String>,
    pub delivered_artifact: Option<DeliveredArtifact>,
    pub analysis_summary: Option<BTreeMap<String, Value>>,
    pub editing_report: Option<EditingReport>,
    pub error_message: Option<String>,
    /// Machine-friendly error label, see [`StagecraftError::kind`].
    pub error_kind: Option<String>,
    pub elapsed_seconds: f64,
}

impl PipelineResult {
    fn failure(err: &StagecraftError, elapsed_seconds: f64) -> Self {
        Self {
            success: false,
            narrative: None,
            delivered_artifact: None,
            analysis_summary: None,
            editing_report: None,
            error_message: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            elapsed_seconds,
        }
    }
}

/// Outcome of [`Pipeline::preview`]: ingestion and analysis only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResult {
    pub success: bool,
    pub analysis: Option<AnalysisResult>,
    pub analysis_summary: Option<BTreeMap<String, Value>>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub elapsed_seconds: f64,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once when the run ends, successfully or not.
    fn finished(&self, success: bool, elapsed_seconds: f64);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn finished(&self, _success: bool, _elapsed_seconds: f64) {}
}

fn elapsed(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 1000.0).round() / 1000.0
}

/// Performance numbers plus the event and role facts a caller usually shows.
pub fn analysis_summary(analysis: &AnalysisResult) -> BTreeMap<String, Value> {
    let mut summary = analysis.performance.clone();
    let event = &analysis.event;
    summary.insert("event_number".into(), json!(event.event_number));
    summary.insert("route".into(), json!(event.route));
    summary.insert("category".into(), json!(event.category.as_str()));
    summary.insert("winner".into(), json!(event.winner));
    summary.insert("position".into(), json!(analysis.role.position));
    summary.insert("pairing_count".into(), json!(analysis.pairings.len()));
    summary.insert("beat_count".into(), json!(analysis.timeline.beats.len()));
    summary
}

/// The six agents, constructed once and run in order.
pub struct Pipeline {
    activity: ActivityAgent,
    events: EventRecordAgent,
    analysis: AnalysisAgent,
    writer: WriterAgent,
    editor: EditorAgent,
    delivery: DeliveryAgent,
    storage: Option<Arc<Storage>>,
}

impl Pipeline {
    /// Assemble from explicit collaborators.
    pub fn new(
        config: &AppConfig,
        generator: Arc<dyn TextGenerator>,
        source: Arc<dyn ActivitySource>,
        fetcher: Arc<dyn ReportFetcher>,
    ) -> Self {
        let ingest = IngestConfig::from(config);
        Self {
            activity: ActivityAgent::new(source, generator.clone(), ingest.activity),
            events: EventRecordAgent::new(
                fetcher,
                generator.clone(),
                ingest.event_source,
                ingest.category_overrides,
            ),
            analysis: AnalysisAgent::new(generator.clone(), config.athlete.clone()),
            writer: WriterAgent::new(generator.clone(), config.athlete.name.clone()),
            editor: EditorAgent::new(generator, config.editor),
            delivery: DeliveryAgent::from_config(config),
            storage: None,
        }
    }

    /// Assemble the production wiring: activity API, HTTP report fetcher,
    /// configured model, and the database when one is configured.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let storage = match &config.defaults.database {
            Some(path) => Some(Arc::new(Storage::open(&expand_home(path)).await?)),
            None => None,
        };

        let mut generator = generator_from_config(&config.model);
        if let Some(storage) = &storage {
            generator = Arc::new(CachedGenerator::new(generator, storage.clone()));
        }

        let source = Arc::new(StravaClient::from_config(&config.activity)?);
        let fetcher = Arc::new(HttpReportFetcher::new(config.event_source.timeout_secs)?);

        let mut pipeline = Self::new(config, generator, source, fetcher);
        pipeline.storage = storage;
        Ok(pipeline)
    }

    /// Record every run in `storage`.
    pub fn with_storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn delivery(&self) -> &DeliveryAgent {
        &self.delivery
    }

    /// Fetch both inputs and analyze them. The only fallible stage.
    async fn ingest_and_analyze(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<AnalysisResult> {
        progress.phase("Fetching activity");
        let activity_id = match request.activity_id {
            Some(id) => id,
            None => self.activity.find_today(request.date).await?,
        };
        let activity = self.activity.fetch(activity_id).await?;

        progress.phase("Fetching stage report");
        let event = self
            .events
            .fetch(request.event_number, request.date)
            .await?
            .ok_or_else(|| {
                StagecraftError::not_found(format!(
                    "no report found for stage {} on {}",
                    request.event_number, request.date
                ))
            })?;

        progress.phase("Analyzing ride against the stage");
        Ok(self.analysis.analyze(activity, event).await)
    }

    /// Ingestion and analysis only.
    #[instrument(skip_all, fields(event_number = request.event_number, date = %request.date))]
    pub async fn preview(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressReporter,
    ) -> PreviewResult {
        let start = Instant::now();
        let result = match self.ingest_and_analyze(request, progress).await {
            Ok(analysis) => PreviewResult {
                success: true,
                analysis_summary: Some(analysis_summary(&analysis)),
                analysis: Some(analysis),
                error_message: None,
                error_kind: None,
                elapsed_seconds: elapsed(start),
            },
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "preview failed");
                PreviewResult {
                    success: false,
                    analysis: None,
                    analysis_summary: None,
                    error_message: Some(e.to_string()),
                    error_kind: Some(e.kind().to_string()),
                    elapsed_seconds: elapsed(start),
                }
            }
        };
        progress.finished(result.success, result.elapsed_seconds);
        result
    }

    /// Run every stage in order.
    ///
    /// Ingestion failures short-circuit into `success = false`. Generation
    /// failures never surface; each stage falls back on its own.
    #[instrument(skip_all, fields(event_number = request.event_number, date = %request.date, style = %request.style))]
    pub async fn run(&self, request: &RunRequest, progress: &dyn ProgressReporter) -> PipelineResult {
        let start = Instant::now();
        info!(format = request.format.as_str(), "starting pipeline run");

        let analysis = match self.ingest_and_analyze(request, progress).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "ingestion failed, stopping run");
                let result = PipelineResult::failure(&e, elapsed(start));
                self.record(request, None, &result).await;
                progress.finished(false, result.elapsed_seconds);
                return result;
            }
        };

        progress.phase("Writing draft");
        let draft = self
            .writer
            .generate(&analysis, request.style, request.rider_context.as_deref())
            .await;

        progress.phase("Editing");
        let mut report = self.editor.edit(&draft, &analysis).await;
        if let Some(feedback) = request.feedback.as_deref() {
            progress.phase("Applying feedback");
            report = self
                .editor
                .apply_feedback(report, feedback, &analysis, request.style)
                .await;
        }

        progress.phase("Delivering");
        let options = DeliveryOptions {
            format: request.format,
            style: request.style,
            archive: request.archive,
        };
        let delivered = self
            .delivery
            .deliver(&report.edited_text, &analysis, &report, &options);

        let (delivered_artifact, error) = match delivered {
            Ok(artifact) => (Some(artifact), None),
            Err(e) => {
                error!(error = %e, "delivery failed, narrative kept in result");
                (None, Some(e))
            }
        };

        let result = PipelineResult {
            success: error.is_none(),
            narrative: Some(report.edited_text.clone()),
            delivered_artifact,
            analysis_summary: Some(analysis_summary(&analysis)),
            error_message: error.as_ref().map(ToString::to_string),
            error_kind: error.as_ref().map(|e| e.kind().to_string()),
            editing_report: Some(report),
            elapsed_seconds: elapsed(start),
        };

        info!(
            success = result.success,
            elapsed_seconds = result.elapsed_seconds,
            threshold_met = result.editing_report.as_ref().map(|r| r.threshold_met),
            "pipeline run complete"
        );
        self.record(request, Some(analysis.activity.id), &result).await;
        progress.finished(result.success, result.elapsed_seconds);
        result
    }

    /// Append to run history. Storage errors are logged only.
    async fn record(&self, request: &RunRequest, activity_id: Option<u64>, result: &PipelineResult) {
        let Some(storage) = &self.storage else {
            return;
        };
        let run = RunRecord {
            id: uuid::Uuid::now_v7().to_string(),
            event_number: request.event_number,
            event_date: request.date.format("%Y-%m-%d").to_string(),
            activity_id: activity_id.or(request.activity_id),
            style: request.style.as_str().to_string(),
            format: request.format.as_str().to_string(),
            success: result.success,
            error_message: result.error_message.clone(),
            artifact_path: result
                .delivered_artifact
                .as_ref()
                .and_then(|a| a.file_path.as_ref())
                .map(|p| p.display().to_string()),
            elapsed_seconds: result.elapsed_seconds,
            created_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = storage.record_run(&run).await {
            warn!(error = %e, "failed to record run history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;
    use stagecraft_ingest::{ActivityStreams, ActivitySummary, StaticReportFetcher};
    use stagecraft_model::{DisabledGenerator, ScriptedGenerator};
    use stagecraft_shared::{EventSourceConfig, RoleTag};

    struct FakeSource {
        summary: Value,
    }

    impl FakeSource {
        fn new(moving_minutes: u64) -> Self {
            Self {
                summary: json!({
                    "id": 42,
                    "name": "Evening ride",
                    "sport_type": "Ride",
                    "start_date": "2025-07-08T16:30:00Z",
                    "start_date_local": "2025-07-08T18:30:00Z",
                    "moving_time": moving_minutes * 60,
                    "elapsed_time": moving_minutes * 60 + 300,
                    "distance": 61400.0,
                    "average_watts": 205.0,
                    "max_watts": 610.0,
                    "weighted_average_watts": 228.0,
                    "average_heartrate": 151.0,
                    "max_heartrate": 183.0
                }),
            }
        }

        fn summary(&self) -> ActivitySummary {
            serde_json::from_value(self.summary.clone()).unwrap()
        }
    }

    #[async_trait]
    impl ActivitySource for FakeSource {
        async fn list_activities(&self, _after: DateTime<Utc>) -> Result<Vec<ActivitySummary>> {
            Ok(vec![self.summary()])
        }

        async fn activity_summary(&self, id: u64) -> Result<ActivitySummary> {
            if id == 42 {
                Ok(self.summary())
            } else {
                Err(StagecraftError::not_found(format!("activity {id} not found")))
            }
        }

        async fn activity_streams(&self, _id: u64) -> Result<ActivityStreams> {
            Ok(ActivityStreams::default())
        }
    }

    struct RecordingProgress(Mutex<Vec<String>>);

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.0.lock().unwrap().push(name.to_string());
        }
        fn finished(&self, success: bool, _elapsed_seconds: f64) {
            self.0.lock().unwrap().push(format!("finished:{success}"));
        }
    }

    fn fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/html")
            .join(name);
        std::fs::read_to_string(path).expect("fixture")
    }

    fn config(archive_dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.event_source = EventSourceConfig {
            base_url: "https://races.test".into(),
            ..EventSourceConfig::default()
        };
        config.defaults.archive_dir = archive_dir.display().to_string();
        config.athlete.name = "Sam".into();
        config
    }

    fn pipeline(config: &AppConfig, generator: Arc<dyn TextGenerator>, minutes: u64) -> Pipeline {
        let fetcher = StaticReportFetcher::new().with_page(
            "https://races.test/race/tour-de-france/2025/stage-4",
            fixture("stage_report.html"),
        );
        Pipeline::new(
            config,
            generator,
            Arc::new(FakeSource::new(minutes)),
            Arc::new(fetcher),
        )
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 8).unwrap()
    }

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sc-pipeline-{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn full_run_on_fallbacks() {
        let dir = temp_dir();
        let config = config(&dir);
        let pipeline = pipeline(&config, Arc::new(DisabledGenerator), 95);
        let request = RunRequest::with_defaults(&config, 4, date());
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let result = pipeline.run(&request, &progress).await;

        assert!(result.success, "{:?}", result.error_message);
        let narrative = result.narrative.as_deref().unwrap();
        assert!(!narrative.trim().is_empty());
        assert!(narrative.contains("Pogačar"));

        let report = result.editing_report.as_ref().unwrap();
        assert!(report.iteration_count <= report.max_iterations);

        let artifact = result.delivered_artifact.as_ref().unwrap();
        assert_eq!(artifact.format, DeliveryFormat::Markup);
        let path = artifact.file_path.as_ref().unwrap();
        assert!(path.starts_with(&dir));
        assert!(path.exists());

        let summary = result.analysis_summary.as_ref().unwrap();
        assert_eq!(summary["event_number"], json!(4));
        assert_eq!(summary["winner"], json!("Tadej Pogačar"));

        let phases = progress.0.lock().unwrap().clone();
        assert_eq!(phases.first().map(String::as_str), Some("Fetching activity"));
        assert_eq!(phases.last().map(String::as_str), Some("finished:true"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_report_short_circuits() {
        let dir = temp_dir();
        let config = config(&dir);
        let generator = Arc::new(ScriptedGenerator::new());
        let pipeline = pipeline(&config, generator.clone(), 95);
        let request = RunRequest::with_defaults(&config, 12, date());

        let result = pipeline.run(&request, &SilentProgress).await;

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("not_found"));
        assert!(result.error_message.unwrap().contains("stage 12"));
        assert!(result.narrative.is_none());
        // Nothing after ingestion was attempted
        assert_eq!(generator.calls(stagecraft_model::tasks::WRITE_DRAFT), 0);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn short_ride_is_a_validation_failure() {
        let dir = temp_dir();
        let config = config(&dir);
        let pipeline = pipeline(&config, Arc::new(DisabledGenerator), 12);
        let mut request = RunRequest::with_defaults(&config, 4, date());
        request.activity_id = Some(42);

        let result = pipeline.run(&request, &SilentProgress).await;
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("validation"));
    }

    #[tokio::test]
    async fn preview_stops_after_analysis() {
        let dir = temp_dir();
        let config = config(&dir);
        let generator = Arc::new(ScriptedGenerator::new());
        let pipeline = pipeline(&config, generator.clone(), 95);
        let mut request = RunRequest::with_defaults(&config, 4, date());
        request.activity_id = Some(42);

        let preview = pipeline.preview(&request, &SilentProgress).await;

        assert!(preview.success);
        let analysis = preview.analysis.unwrap();
        assert_eq!(analysis.activity.id, 42);
        assert!(analysis.activity.intervals.len() >= 2);
        assert!(RoleTag::ALL.contains(&analysis.role.role));
        assert_eq!(generator.calls(stagecraft_model::tasks::WRITE_DRAFT), 0);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn structured_run_without_archive_records_history() {
        let dir = temp_dir();
        let config = config(&dir);
        let storage = Arc::new(Storage::open(&dir.join("runs.db")).await.unwrap());
        let pipeline =
            pipeline(&config, Arc::new(DisabledGenerator), 95).with_storage(storage.clone());
        let mut request = RunRequest::with_defaults(&config, 4, date());
        request.format = DeliveryFormat::Structured;
        request.archive = false;
        request.feedback = Some("More about the finish".into());

        let result = pipeline.run(&request, &SilentProgress).await;
        assert!(result.success);

        let artifact = result.delivered_artifact.unwrap();
        assert!(artifact.file_path.is_none());
        let parsed: Value = serde_json::from_str(&artifact.content).unwrap();
        assert_eq!(parsed["metadata"]["event_number"], json!(4));

        let runs = storage.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].activity_id, Some(42));
        assert_eq!(runs[0].format, "structured");
        assert!(runs[0].success);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
