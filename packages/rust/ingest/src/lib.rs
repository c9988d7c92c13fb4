//! Input agents: the athlete's workout and the stage it is mapped onto.
//!
//! This crate provides:
//! - [`ActivityAgent`]: finds and validates one workout, then segments it into intervals
//! - [`EventRecordAgent`]: discovers a stage report and extracts a structured record
//! - [`text`]: report HTML → clean text
//! - [`report`]: report discovery over a [`ReportFetcher`]

pub mod activity;
pub mod event;
pub mod extract;
pub mod incidents;
pub mod intervals;
pub mod report;
pub mod text;

pub use activity::{ActivityAgent, ActivitySource, ActivityStreams, ActivitySummary, StravaClient};
pub use event::EventRecordAgent;
pub use extract::{ExtractedFields, extract_fields};
pub use incidents::{IncidentContext, extract_incidents, fallback_incidents};
pub use intervals::{RideStats, WindowSummary, normalized_power, select_intervals};
pub use report::{
    DiscoveredReport, HttpReportFetcher, ReportFetcher, StaticReportFetcher, discover_report,
};
pub use text::{ReportText, html_to_report_text};

use std::collections::HashMap;

use stagecraft_shared::{ActivityConfig, AppConfig, Category, EventSourceConfig};

/// Everything the two input agents need from the app config.
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    pub activity: ActivityConfig,
    pub event_source: EventSourceConfig,
    pub category_overrides: HashMap<u32, Category>,
}

impl From<&AppConfig> for IngestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            activity: config.activity.clone(),
            event_source: config.event_source.clone(),
            category_overrides: config.category_overrides(),
        }
    }
}
