//! Application configuration for Stagecraft.
//!
//! User config lives at `~/.stagecraft/stagecraft.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StagecraftError};
use crate::narrative::{DeliveryFormat, Style};
use crate::types::Category;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "stagecraft.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".stagecraft";

// ---------------------------------------------------------------------------
// Config structs (matching stagecraft.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Text-generation model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Activity API settings.
    #[serde(default)]
    pub activity: ActivityConfig,

    /// The athlete the stories are about.
    #[serde(default)]
    pub athlete: AthleteConfig,

    /// Where stage reports come from.
    #[serde(default)]
    pub event_source: EventSourceConfig,

    /// Editing loop settings.
    #[serde(default)]
    pub editor: EditorConfig,

    /// Delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Stage number → category, overriding whatever the report says.
    #[serde(default)]
    pub category_overrides: BTreeMap<String, Category>,
}

impl AppConfig {
    /// Category overrides keyed by stage number. Non-numeric keys are ignored.
    pub fn category_overrides(&self) -> HashMap<u32, Category> {
        self.category_overrides
            .iter()
            .filter_map(|(k, v)| match k.trim().parse::<u32>() {
                Ok(n) => Some((n, *v)),
                Err(_) => {
                    tracing::warn!(key = %k, "ignoring non-numeric category override key");
                    None
                }
            })
            .collect()
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Archive directory for delivered stories.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,

    /// Default narrative style.
    #[serde(default = "default_style")]
    pub style: Style,

    /// Default delivery format.
    #[serde(default = "default_format")]
    pub format: DeliveryFormat,

    /// Whether delivered stories are archived.
    #[serde(default = "default_true")]
    pub archive: bool,

    /// Optional libSQL database for the generation cache and run history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            style: default_style(),
            format: default_format(),
            archive: true,
            database: None,
        }
    }
}

fn default_archive_dir() -> String {
    "~/stagecraft-archive".into()
}
fn default_style() -> Style {
    Style::Literary
}
fn default_format() -> DeliveryFormat {
    DeliveryFormat::Markup
}
fn default_true() -> bool {
    true
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Turn model-assisted generation off entirely (deterministic fallbacks only).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Chat-completions endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Default model to use for every generation task.
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: default_api_key_env(),
            endpoint: default_endpoint(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_model_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2_000
}
fn default_model_timeout() -> u64 {
    90
}

/// `[activity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Base URL of the Strava-compatible activity API.
    #[serde(default = "default_activity_api")]
    pub api_base: String,

    /// Name of the env var holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Sport types that qualify.
    #[serde(default = "default_sport_types")]
    pub sport_types: Vec<String>,

    /// Rides shorter than this are rejected.
    #[serde(default = "default_min_duration")]
    pub min_duration_minutes: f64,

    /// Window length for effort segmentation.
    #[serde(default = "default_window")]
    pub window_minutes: f64,

    #[serde(default = "default_activity_timeout")]
    pub timeout_secs: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            api_base: default_activity_api(),
            token_env: default_token_env(),
            sport_types: default_sport_types(),
            min_duration_minutes: default_min_duration(),
            window_minutes: default_window(),
            timeout_secs: default_activity_timeout(),
        }
    }
}

fn default_activity_api() -> String {
    "https://www.strava.com/api/v3".into()
}
fn default_token_env() -> String {
    "STRAVA_ACCESS_TOKEN".into()
}
fn default_sport_types() -> Vec<String> {
    vec!["Ride".into(), "VirtualRide".into()]
}
fn default_min_duration() -> f64 {
    20.0
}
fn default_window() -> f64 {
    10.0
}
fn default_activity_timeout() -> u64 {
    30
}

/// `[athlete]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteConfig {
    /// Name used in the stories.
    #[serde(default = "default_athlete_name")]
    pub name: String,

    /// Functional threshold power in watts.
    #[serde(default = "default_threshold_power")]
    pub threshold_power: f64,
}

impl Default for AthleteConfig {
    fn default() -> Self {
        Self {
            name: default_athlete_name(),
            threshold_power: default_threshold_power(),
        }
    }
}

fn default_athlete_name() -> String {
    "the rider".into()
}
fn default_threshold_power() -> f64 {
    250.0
}

/// `[event_source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSourceConfig {
    /// Site root, substituted as `{base}`.
    #[serde(default = "default_event_base")]
    pub base_url: String,

    /// Race slug, substituted as `{race}`.
    #[serde(default = "default_race")]
    pub race: String,

    /// Season, substituted as `{season}`.
    #[serde(default = "default_season")]
    pub season: i32,

    /// Direct report URL patterns, tried in order. `{n}` is the stage number,
    /// `{date}` the ISO date.
    #[serde(default = "default_url_patterns")]
    pub url_patterns: Vec<String>,

    /// Listing page used for link-following discovery.
    #[serde(default = "default_listing_pattern")]
    pub listing_pattern: String,

    #[serde(default = "default_event_timeout")]
    pub timeout_secs: u64,

    /// Extracted report text shorter than this does not count as a report.
    #[serde(default = "default_min_report_chars")]
    pub min_report_chars: usize,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_event_base(),
            race: default_race(),
            season: default_season(),
            url_patterns: default_url_patterns(),
            listing_pattern: default_listing_pattern(),
            timeout_secs: default_event_timeout(),
            min_report_chars: default_min_report_chars(),
        }
    }
}

fn default_event_base() -> String {
    "https://www.procyclingstats.com".into()
}
fn default_race() -> String {
    "tour-de-france".into()
}
fn default_season() -> i32 {
    2025
}
fn default_url_patterns() -> Vec<String> {
    vec![
        "{base}/race/{race}/{season}/stage-{n}".into(),
        "{base}/race/{race}/{season}/stage-{n}/info".into(),
    ]
}
fn default_listing_pattern() -> String {
    "{base}/race/{race}/{season}/route/stages".into()
}
fn default_event_timeout() -> u64 {
    20
}
fn default_min_report_chars() -> usize {
    200
}

/// `[editor]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Minimum acceptable score on every quality dimension.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Upper bound on rewrite iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_quality_threshold() -> f64 {
    0.9
}
fn default_max_iterations() -> u32 {
    2
}

/// `[delivery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Title template: `{n}`, `{route}`, `{date}`, `{winner}`, `{role}`.
    #[serde(default = "default_title_template")]
    pub title_template: String,

    /// Include the full performance summary in metadata.
    #[serde(default)]
    pub include_performance: bool,

    /// Include editor scores in metadata.
    #[serde(default)]
    pub include_scores: bool,

    /// Maximum characters in the `message` format.
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            title_template: default_title_template(),
            include_performance: false,
            include_scores: false,
            message_limit: default_message_limit(),
        }
    }
}

fn default_title_template() -> String {
    "Stage {n}: {route}".into()
}
fn default_message_limit() -> usize {
    1_500
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.stagecraft/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StagecraftError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.stagecraft/stagecraft.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StagecraftError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        StagecraftError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StagecraftError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StagecraftError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StagecraftError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the model API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.model.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(StagecraftError::config(format!(
            "model API key not found. Set the {var_name} environment variable \
             or disable the model with `[model] enabled = false`."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("archive_dir"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("STRAVA_ACCESS_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.editor.max_iterations, 2);
        assert_eq!(parsed.editor.quality_threshold, 0.9);
        assert_eq!(parsed.model.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(parsed.defaults.style, Style::Literary);
    }

    #[test]
    fn config_with_overrides() {
        let toml_str = r#"
[defaults]
archive_dir = "/tmp/archive"
style = "dramatic"
format = "structured"

[editor]
quality_threshold = 0.8

[category_overrides]
"5" = "time_trial"
"12" = "mountain"
"prologue" = "flat"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.style, Style::Dramatic);
        assert_eq!(config.defaults.format, DeliveryFormat::Structured);
        assert_eq!(config.editor.quality_threshold, 0.8);
        assert_eq!(config.editor.max_iterations, 2);

        let overrides = config.category_overrides();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides.get(&5), Some(&Category::TimeTrial));
        assert_eq!(overrides.get(&12), Some(&Category::Mountain));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.model.api_key_env = "SC_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/archive"), PathBuf::from("/var/archive"));
    }
}
