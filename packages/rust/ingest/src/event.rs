//! Event Record Agent: stage report → [`EventRecord`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument};

use stagecraft_model::TextGenerator;
use stagecraft_shared::{Category, EventRecord, EventSourceConfig, Result};

use crate::extract::extract_fields;
use crate::incidents::{IncidentContext, extract_incidents};
use crate::report::{ReportFetcher, discover_report};

/// Finds a stage report and turns it into structured facts.
pub struct EventRecordAgent {
    fetcher: Arc<dyn ReportFetcher>,
    generator: Arc<dyn TextGenerator>,
    config: EventSourceConfig,
    overrides: HashMap<u32, Category>,
}

impl EventRecordAgent {
    pub fn new(
        fetcher: Arc<dyn ReportFetcher>,
        generator: Arc<dyn TextGenerator>,
        config: EventSourceConfig,
        overrides: HashMap<u32, Category>,
    ) -> Self {
        Self {
            fetcher,
            generator,
            config,
            overrides,
        }
    }

    /// `Ok(None)` when no report could be found at all. Partial extraction
    /// is filled from heuristics and defaults instead of failing.
    #[instrument(skip_all, fields(event_number = event_number, %date))]
    pub async fn fetch(&self, event_number: u32, date: NaiveDate) -> Result<Option<EventRecord>> {
        let Some(found) =
            discover_report(self.fetcher.as_ref(), &self.config, event_number, date).await?
        else {
            return Ok(None);
        };

        let fields = extract_fields(self.generator.as_ref(), &found.report, event_number).await;

        let category = match self.overrides.get(&event_number) {
            Some(&overridden) => {
                if overridden != fields.category {
                    info!(
                        reported = %fields.category,
                        overridden = %overridden,
                        "category override applied"
                    );
                }
                overridden
            }
            None => fields.category,
        };

        let ctx = IncidentContext {
            event_number,
            distance_km: fields.distance_km,
            category,
            winner: &fields.winner,
        };
        let (incidents, incident_source) =
            extract_incidents(self.generator.as_ref(), &found.report, &ctx).await;

        info!(
            route = %fields.route,
            %category,
            winner = %fields.winner,
            incidents = incidents.len(),
            fields_source = ?fields.provenance,
            incidents_source = ?incident_source,
            "stage record built"
        );

        Ok(Some(EventRecord {
            event_number,
            route: fields.route,
            date,
            distance_km: fields.distance_km,
            category,
            winner: fields.winner,
            winning_team: fields.winning_team,
            weather: fields.weather,
            incidents,
            top_results: fields.top_results,
            source_url: Some(found.url),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StaticReportFetcher;
    use stagecraft_model::DisabledGenerator;
    use stagecraft_shared::IncidentKind;

    fn fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/html")
            .join(name);
        std::fs::read_to_string(path).expect("fixture")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 8).unwrap()
    }

    fn agent(overrides: HashMap<u32, Category>) -> EventRecordAgent {
        let config = EventSourceConfig {
            base_url: "https://races.test".into(),
            ..EventSourceConfig::default()
        };
        let fetcher = StaticReportFetcher::new().with_page(
            "https://races.test/race/tour-de-france/2025/stage-4",
            fixture("stage_report.html"),
        );
        EventRecordAgent::new(
            Arc::new(fetcher),
            Arc::new(DisabledGenerator),
            config,
            overrides,
        )
    }

    #[tokio::test]
    async fn builds_record_from_fixture_without_model() {
        let record = agent(HashMap::new())
            .fetch(4, date())
            .await
            .unwrap()
            .expect("record");

        assert_eq!(record.event_number, 4);
        assert_eq!(record.winner, "Tadej Pogačar");
        assert_eq!(record.category, Category::Hilly);
        assert_eq!(record.distance_km, 174.2);
        assert_eq!(record.start_city(), Some("Amiens Métropole"));
        assert_eq!(record.incidents.last().unwrap().kind, IncidentKind::Finish);
        assert!(record.source_url.unwrap().ends_with("stage-4"));
    }

    #[tokio::test]
    async fn override_always_wins() {
        let overrides = HashMap::from([(4, Category::TimeTrial)]);
        let record = agent(overrides).fetch(4, date()).await.unwrap().unwrap();
        assert_eq!(record.category, Category::TimeTrial);
        // Fallback incidents follow the overridden category
        assert_eq!(record.incidents[0].kind, IncidentKind::Other);
    }

    #[tokio::test]
    async fn missing_report_is_none() {
        let record = agent(HashMap::new()).fetch(12, date()).await.unwrap();
        assert!(record.is_none());
    }
}
