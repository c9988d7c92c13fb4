//! Stage report discovery.
//!
//! Pages come through the [`ReportFetcher`] seam. Discovery first tries the
//! configured direct URL patterns, then falls back to following the matching
//! link on a stage listing page. A page only counts as a report when its
//! extracted text clears `min_report_chars`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use stagecraft_shared::{EventSourceConfig, Result, StagecraftError};

use crate::text::{ReportText, html_to_report_text};

/// Maximum number of redirects followed per page.
const MAX_REDIRECTS: usize = 5;

/// Largest page body accepted (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

/// User-Agent string for report requests.
const USER_AGENT: &str = concat!("Stagecraft/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Fetcher seam
// ---------------------------------------------------------------------------

/// Fetches raw HTML. `Ok(None)` means the page does not exist.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<Option<String>>;
}

/// reqwest-backed fetcher.
pub struct HttpReportFetcher {
    client: Client,
}

impl HttpReportFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                StagecraftError::ExternalService(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReportFetcher for HttpReportFetcher {
    async fn fetch_page(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StagecraftError::ExternalService(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StagecraftError::ExternalService(format!(
                "{url}: HTTP {status}"
            )));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(StagecraftError::validation(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        let body = response.text().await.map_err(|e| {
            StagecraftError::ExternalService(format!("{url}: failed to read body: {e}"))
        })?;
        Ok(Some(body))
    }
}

/// In-memory fetcher keyed by exact URL.
#[derive(Debug, Clone, Default)]
pub struct StaticReportFetcher {
    pages: HashMap<String, String>,
}

impl StaticReportFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }
}

#[async_trait]
impl ReportFetcher for StaticReportFetcher {
    async fn fetch_page(&self, url: &str) -> Result<Option<String>> {
        Ok(self.pages.get(url).cloned())
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A report page that passed the length check.
#[derive(Debug, Clone)]
pub struct DiscoveredReport {
    pub url: String,
    pub report: ReportText,
}

/// Fill a URL pattern's `{base}`, `{race}`, `{season}`, `{n}`, `{date}`.
pub fn expand_pattern(
    pattern: &str,
    config: &EventSourceConfig,
    event_number: u32,
    date: NaiveDate,
) -> String {
    pattern
        .replace("{base}", config.base_url.trim_end_matches('/'))
        .replace("{race}", &config.race)
        .replace("{season}", &config.season.to_string())
        .replace("{n}", &event_number.to_string())
        .replace("{date}", &date.format("%Y-%m-%d").to_string())
}

/// Find the report for a stage, or `None` when no strategy produced one.
#[instrument(skip_all, fields(event_number = event_number, %date))]
pub async fn discover_report(
    fetcher: &dyn ReportFetcher,
    config: &EventSourceConfig,
    event_number: u32,
    date: NaiveDate,
) -> Result<Option<DiscoveredReport>> {
    // Strategy 1: direct URL patterns
    for pattern in &config.url_patterns {
        let url = expand_pattern(pattern, config, event_number, date);
        if let Some(found) = try_report(fetcher, &url, config.min_report_chars).await {
            info!(url = %found.url, strategy = "pattern", "stage report found");
            return Ok(Some(found));
        }
    }

    // Strategy 2: follow the stage link on the listing page
    let listing_url = expand_pattern(&config.listing_pattern, config, event_number, date);
    let listing = match fetcher.fetch_page(&listing_url).await {
        Ok(Some(html)) => html,
        Ok(None) => {
            debug!(url = %listing_url, "listing page not found");
            return Ok(None);
        }
        Err(e) => {
            warn!(url = %listing_url, error = %e, "listing page fetch failed");
            return Ok(None);
        }
    };

    let Ok(base) = Url::parse(&listing_url) else {
        warn!(url = %listing_url, "listing URL does not parse, cannot resolve links");
        return Ok(None);
    };

    for candidate in stage_links(&listing, &base, event_number) {
        if let Some(found) = try_report(fetcher, candidate.as_str(), config.min_report_chars).await
        {
            info!(url = %found.url, strategy = "listing", "stage report found");
            return Ok(Some(found));
        }
    }

    info!("no stage report found");
    Ok(None)
}

/// Fetch one URL and keep it if it reads like a report.
async fn try_report(
    fetcher: &dyn ReportFetcher,
    url: &str,
    min_chars: usize,
) -> Option<DiscoveredReport> {
    let html = match fetcher.fetch_page(url).await {
        Ok(Some(html)) => html,
        Ok(None) => {
            debug!(url, "no page");
            return None;
        }
        Err(e) => {
            warn!(url, error = %e, "report fetch failed");
            return None;
        }
    };

    match html_to_report_text(&html) {
        Ok(report) if report.char_count() >= min_chars => Some(DiscoveredReport {
            url: url.to_string(),
            report,
        }),
        Ok(report) => {
            debug!(url, chars = report.char_count(), min_chars, "page too short");
            None
        }
        Err(e) => {
            warn!(url, error = %e, "report conversion failed");
            None
        }
    }
}

/// Links on a listing page that name the stage, by href or anchor text.
/// Resolved against the listing URL, deduplicated, in page order.
pub fn stage_links(listing_html: &str, base: &Url, event_number: u32) -> Vec<Url> {
    let Ok(anchor_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let href_re = Regex::new(&format!(r"(?i)stage[-_/]?0?{event_number}(?:[^0-9]|$)"));
    let text_re = Regex::new(&format!(r"(?i)\bstage\s+0?{event_number}\b"));
    let (Ok(href_re), Ok(text_re)) = (href_re, text_re) else {
        return Vec::new();
    };

    let doc = Html::parse_document(listing_html);
    let mut links: Vec<Url> = Vec::new();
    for anchor in doc.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let text = anchor.text().collect::<String>();
        if !href_re.is_match(href) && !text_re.is_match(&text) {
            continue;
        }
        if let Ok(url) = base.join(href) {
            if !links.contains(&url) {
                links.push(url);
            }
        }
    }
    links
}
