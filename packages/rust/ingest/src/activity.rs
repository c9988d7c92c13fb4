//! Activity Retrieval Agent: one workout from a Strava-compatible API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use stagecraft_model::TextGenerator;
use stagecraft_shared::{ActivityConfig, Result, SourceActivity, StagecraftError};

use crate::intervals::{RideStats, normalized_power, select_intervals, summarize_windows};

/// Plausible ranges; values outside are clamped.
const POWER_RANGE: (f64, f64) = (0.0, 2500.0);
const HEART_RATE_RANGE: (f64, f64) = (30.0, 230.0);
const CADENCE_RANGE: (f64, f64) = (0.0, 220.0);

/// How many recent activities `find_today` inspects.
const LIST_PAGE_SIZE: u32 = 30;

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

/// Activity summary as returned by the list and detail endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivitySummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sport_type: Option<String>,
    #[serde(rename = "type", default)]
    pub activity_type: Option<String>,
    pub start_date: DateTime<Utc>,
    /// Local wall-clock start, serialized with a misleading `Z`.
    #[serde(default)]
    pub start_date_local: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub moving_time: u64,
    /// Seconds.
    #[serde(default)]
    pub elapsed_time: u64,
    /// Metres.
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub average_watts: Option<f64>,
    #[serde(default)]
    pub max_watts: Option<f64>,
    #[serde(default)]
    pub weighted_average_watts: Option<f64>,
    #[serde(default)]
    pub average_heartrate: Option<f64>,
    #[serde(default)]
    pub max_heartrate: Option<f64>,
    #[serde(default)]
    pub average_cadence: Option<f64>,
}

impl ActivitySummary {
    pub fn sport(&self) -> Option<&str> {
        self.sport_type.as_deref().or(self.activity_type.as_deref())
    }

    pub fn duration_minutes(&self) -> f64 {
        let secs = if self.moving_time > 0 {
            self.moving_time
        } else {
            self.elapsed_time
        };
        secs as f64 / 60.0
    }

    /// Calendar day of the ride in the athlete's local time.
    pub fn local_date(&self) -> NaiveDate {
        self.start_date_local
            .as_deref()
            .and_then(|s| s.get(..10))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .unwrap_or_else(|| self.start_date.date_naive())
    }
}

/// Sample streams; missing streams are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityStreams {
    /// Seconds since start.
    pub time: Vec<f64>,
    pub watts: Vec<Option<f64>>,
    pub heartrate: Vec<Option<f64>>,
    pub cadence: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct Series<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawStreams {
    #[serde(default)]
    time: Option<Series<f64>>,
    #[serde(default)]
    watts: Option<Series<Option<f64>>>,
    #[serde(default)]
    heartrate: Option<Series<Option<f64>>>,
    #[serde(default)]
    cadence: Option<Series<Option<f64>>>,
}

impl From<RawStreams> for ActivityStreams {
    fn from(raw: RawStreams) -> Self {
        Self {
            time: raw.time.map(|s| s.data).unwrap_or_default(),
            watts: raw.watts.map(|s| s.data).unwrap_or_default(),
            heartrate: raw.heartrate.map(|s| s.data).unwrap_or_default(),
            cadence: raw.cadence.map(|s| s.data).unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source seam
// ---------------------------------------------------------------------------

/// Where activities come from.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Recent activities started after `after`, newest first.
    async fn list_activities(&self, after: DateTime<Utc>) -> Result<Vec<ActivitySummary>>;

    async fn activity_summary(&self, id: u64) -> Result<ActivitySummary>;

    /// Empty streams when the activity has none.
    async fn activity_streams(&self, id: u64) -> Result<ActivityStreams>;
}

/// Strava v3 REST client.
pub struct StravaClient {
    client: Client,
    api_base: String,
    token: String,
}

impl StravaClient {
    /// Build from the `[activity]` config section, reading the token from its env var.
    pub fn from_config(config: &ActivityConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                StagecraftError::config(format!(
                    "activity API token not found. Set the {} environment variable.",
                    config.token_env
                ))
            })?;
        Self::new(&config.api_base, token, config.timeout_secs)
    }

    pub fn new(api_base: &str, token: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Stagecraft/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                StagecraftError::ExternalService(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{path}", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StagecraftError::ExternalService(format!("{url}: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(StagecraftError::ExternalService(format!(
                    "activity API rejected credentials (HTTP {})",
                    status.as_u16()
                )));
            }
            s if !s.is_success() => {
                return Err(StagecraftError::ExternalService(format!("{url}: HTTP {s}")));
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| {
            StagecraftError::ExternalService(format!("{url}: failed to read body: {e}"))
        })?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| StagecraftError::parse(format!("{url}: {e}")))
    }
}

#[async_trait]
impl ActivitySource for StravaClient {
    async fn list_activities(&self, after: DateTime<Utc>) -> Result<Vec<ActivitySummary>> {
        let path = format!(
            "/athlete/activities?after={}&per_page={LIST_PAGE_SIZE}",
            after.timestamp()
        );
        Ok(self.get_json(&path).await?.unwrap_or_default())
    }

    async fn activity_summary(&self, id: u64) -> Result<ActivitySummary> {
        self.get_json(&format!("/activities/{id}"))
            .await?
            .ok_or_else(|| StagecraftError::not_found(format!("activity {id} not found")))
    }

    async fn activity_streams(&self, id: u64) -> Result<ActivityStreams> {
        let path =
            format!("/activities/{id}/streams?keys=time,watts,heartrate,cadence&key_by_type=true");
        Ok(self
            .get_json::<RawStreams>(&path)
            .await?
            .map(ActivityStreams::from)
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Non-finite or non-positive readings are absent; the rest are clamped.
fn clamp_metric(value: Option<f64>, (lo, hi): (f64, f64)) -> Option<f64> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .filter(|v| *v > 0.0 || lo == 0.0)
        .map(|v| v.clamp(lo, hi))
}

fn clamp_series(series: &mut [Option<f64>], range: (f64, f64)) {
    for sample in series.iter_mut() {
        *sample = clamp_metric(*sample, range);
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Retrieves and validates one workout, then segments its effort.
pub struct ActivityAgent {
    source: Arc<dyn ActivitySource>,
    generator: Arc<dyn TextGenerator>,
    config: ActivityConfig,
}

impl ActivityAgent {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        generator: Arc<dyn TextGenerator>,
        config: ActivityConfig,
    ) -> Self {
        Self {
            source,
            generator,
            config,
        }
    }

    fn qualifies(&self, summary: &ActivitySummary, date: NaiveDate) -> bool {
        let sport_ok = summary
            .sport()
            .is_some_and(|s| self.config.sport_types.iter().any(|t| t.eq_ignore_ascii_case(s)));
        sport_ok
            && summary.duration_minutes() >= self.config.min_duration_minutes
            && summary.local_date() == date
    }

    /// Id of the first qualifying activity on `date`.
    #[instrument(skip_all, fields(%date))]
    pub async fn find_today(&self, date: NaiveDate) -> Result<u64> {
        // Start a day early so local-time rides near midnight UTC are included
        let after = date
            .checked_sub_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);

        let activities = self.source.list_activities(after).await?;
        debug!(count = activities.len(), "recent activities listed");

        activities
            .iter()
            .find(|a| self.qualifies(a, date))
            .map(|a| {
                info!(activity_id = a.id, name = %a.name, "activity selected");
                a.id
            })
            .ok_or_else(|| {
                StagecraftError::not_found(format!(
                    "no qualifying activity on {date} (sports: {}, minimum {} min)",
                    self.config.sport_types.join(", "),
                    self.config.min_duration_minutes
                ))
            })
    }

    /// Fetch, validate, and segment one activity.
    #[instrument(skip_all, fields(activity_id = activity_id))]
    pub async fn fetch(&self, activity_id: u64) -> Result<SourceActivity> {
        let summary = self.source.activity_summary(activity_id).await?;
        let duration = summary.duration_minutes();
        if duration < self.config.min_duration_minutes {
            return Err(StagecraftError::validation(format!(
                "activity {activity_id} lasted {duration:.1} min, minimum is {} min",
                self.config.min_duration_minutes
            )));
        }

        let mut streams = self.source.activity_streams(activity_id).await?;
        clamp_series(&mut streams.watts, POWER_RANGE);
        clamp_series(&mut streams.heartrate, HEART_RATE_RANGE);
        clamp_series(&mut streams.cadence, CADENCE_RANGE);

        let avg_power = clamp_metric(summary.average_watts, POWER_RANGE);
        let max_power = clamp_metric(summary.max_watts, POWER_RANGE);
        let avg_heart_rate = clamp_metric(summary.average_heartrate, HEART_RATE_RANGE);
        let normalized = normalized_power(&streams)
            .or_else(|| clamp_metric(summary.weighted_average_watts, POWER_RANGE));

        let stats = RideStats {
            duration_minutes: duration,
            avg_power,
            max_power,
            avg_heart_rate,
        };
        let windows = summarize_windows(&streams, self.config.window_minutes, duration);
        let (intervals, intervals_provenance) =
            select_intervals(self.generator.as_ref(), &streams, &windows, &stats).await;

        info!(
            duration_min = duration,
            avg_power,
            normalized_power = normalized,
            intervals = intervals.len(),
            source = ?intervals_provenance,
            "activity ingested"
        );

        Ok(SourceActivity {
            id: summary.id,
            name: summary.name,
            description: summary.description.filter(|d| !d.trim().is_empty()),
            start_time: summary.start_date,
            duration_minutes: duration,
            distance_km: (summary.distance.max(0.0) / 1000.0 * 100.0).round() / 100.0,
            avg_power,
            max_power,
            normalized_power: normalized,
            avg_heart_rate,
            max_heart_rate: clamp_metric(summary.max_heartrate, HEART_RATE_RANGE),
            avg_cadence: clamp_metric(summary.average_cadence, CADENCE_RANGE),
            intervals,
            intervals_provenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_model::DisabledGenerator;
    use stagecraft_shared::Provenance;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summary_json(id: u64, sport: &str, start_local: &str, moving_secs: u64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("Ride {id}"),
            "sport_type": sport,
            "type": sport,
            "start_date": format!("{start_local}"),
            "start_date_local": start_local,
            "moving_time": moving_secs,
            "elapsed_time": moving_secs + 300,
            "distance": 42_195.0,
            "average_watts": 215.0,
            "max_watts": 3100.0,
            "average_heartrate": 148.0,
            "max_heartrate": 181.0,
            "average_cadence": -1.0
        })
    }

    async fn agent(server: &MockServer) -> ActivityAgent {
        let client = StravaClient::new(&server.uri(), "tok", 5).unwrap();
        ActivityAgent::new(
            Arc::new(client),
            Arc::new(DisabledGenerator),
            ActivityConfig::default(),
        )
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 8).unwrap()
    }

    #[tokio::test]
    async fn find_today_applies_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/athlete/activities"))
            .and(query_param("per_page", "30"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                summary_json(1, "Run", "2025-07-08T07:00:00Z", 3600),
                summary_json(2, "Ride", "2025-07-08T08:00:00Z", 600),
                summary_json(3, "Ride", "2025-07-07T18:00:00Z", 5400),
                summary_json(4, "VirtualRide", "2025-07-08T18:30:00Z", 4500),
            ])))
            .mount(&server)
            .await;

        assert_eq!(agent(&server).await.find_today(date()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn find_today_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/athlete/activities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let err = agent(&server).await.find_today(date()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn fetch_clamps_and_segments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/activities/4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(summary_json(
                4,
                "Ride",
                "2025-07-08T18:30:00Z",
                3000,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/activities/4/streams"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let activity = agent(&server).await.fetch(4).await.unwrap();
        assert_eq!(activity.duration_minutes, 50.0);
        assert_eq!(activity.distance_km, 42.2);
        assert_eq!(activity.max_power, Some(2500.0));
        assert_eq!(activity.avg_cadence, None);
        assert_eq!(activity.normalized_power, None);
        assert_eq!(activity.intervals.len(), 2);
        assert_eq!(activity.intervals_provenance, Provenance::Fallback);
    }

    #[tokio::test]
    async fn fetch_rejects_short_ride() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/activities/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(summary_json(
                9,
                "Ride",
                "2025-07-08T18:30:00Z",
                900,
            )))
            .mount(&server)
            .await;

        let err = agent(&server).await.fetch(9).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn auth_failure_is_external_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = agent(&server).await.fetch(1).await.unwrap_err();
        assert_eq!(err.kind(), "external_service");
        assert!(err.to_string().contains("credentials"));
    }

    #[tokio::test]
    async fn streams_are_parsed_by_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/activities/5/streams"))
            .and(query_param("key_by_type", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "time": { "data": [0, 1, 2] },
                "watts": { "data": [200, null, 5000] },
                "heartrate": { "data": [120, 121, 122] }
            })))
            .mount(&server)
            .await;

        let client = StravaClient::new(&server.uri(), "tok", 5).unwrap();
        let streams = client.activity_streams(5).await.unwrap();
        assert_eq!(streams.time, vec![0.0, 1.0, 2.0]);
        assert_eq!(streams.watts, vec![Some(200.0), None, Some(5000.0)]);
        assert!(streams.cadence.is_empty());
    }

    #[test]
    fn clamping_rules() {
        assert_eq!(clamp_metric(Some(-5.0), POWER_RANGE), None);
        assert_eq!(clamp_metric(Some(f64::NAN), POWER_RANGE), None);
        assert_eq!(clamp_metric(Some(0.0), POWER_RANGE), Some(0.0));
        assert_eq!(clamp_metric(Some(0.0), HEART_RATE_RANGE), None);
        assert_eq!(clamp_metric(Some(12.0), HEART_RATE_RANGE), Some(30.0));
        assert_eq!(clamp_metric(Some(400.0), CADENCE_RANGE), Some(220.0));
    }
}
