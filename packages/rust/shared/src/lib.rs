//! Shared types, error model, and configuration for Stagecraft.
//!
//! This crate is the foundation depended on by all other Stagecraft crates.
//! It provides:
//! - [`StagecraftError`]: the unified error type
//! - Domain types ([`SourceActivity`], [`EventRecord`], [`AnalysisResult`], ...)
//! - Narrative types ([`Style`], [`DeliveryFormat`], [`EditingReport`], ...)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod narrative;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ActivityConfig, AppConfig, AthleteConfig, DefaultsConfig, DeliveryConfig, EditorConfig,
    EventSourceConfig, ModelConfig, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{Result, StagecraftError};
pub use narrative::{
    DeliveredArtifact, DeliveryFormat, EditingReport, NarrativeDraft, QualityScores, Style,
    StyleProfile, Tense, Voice,
};
pub use types::{
    AnalysisResult, BeatFocus, Category, EffortInterval, EffortLevel, EffortProfile, EventIncident,
    EventRecord, IncidentKind, IntensityZone, IntervalKind, MappedPairing, NarrativeTimeline,
    Provenance, RacePosition, ResultEntry, RoleAssignment, RoleTag, SourceActivity, TimelineBeat,
};
