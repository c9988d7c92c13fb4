//! Narrative-side types: styles, delivery formats, drafts, editing reports,
//! and delivered artifacts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StagecraftError;
use crate::types::Provenance;

// ---------------------------------------------------------------------------
// Style catalogue
// ---------------------------------------------------------------------------

/// Narrative grammatical person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Voice {
    FirstPerson,
    ThirdPerson,
}

/// Narrative tense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tense {
    Past,
    Present,
}

/// Fixed configuration record attached to each [`Style`].
#[derive(Debug, Clone, Copy)]
pub struct StyleProfile {
    pub voice: Voice,
    pub tense: Tense,
    pub tone: &'static str,
    pub example_phrases: &'static [&'static str],
    /// Acceptable share of technical race vocabulary in the text.
    pub technical_density: (f64, f64),
    /// Target word count range for a finished story.
    pub target_words: (usize, usize),
}

const LITERARY: StyleProfile = StyleProfile {
    voice: Voice::FirstPerson,
    tense: Tense::Past,
    tone: "reflective, sensory, unhurried; the race as a landscape of feeling",
    example_phrases: &[
        "the road unspooled beneath me like a ribbon of grey silk",
        "I could taste the iron of the effort",
        "the crowd's noise folded into the wind",
    ],
    technical_density: (0.0, 0.04),
    target_words: (450, 900),
};

const REPORTAGE: StyleProfile = StyleProfile {
    voice: Voice::ThirdPerson,
    tense: Tense::Past,
    tone: "crisp, factual race report with numbers and tactics",
    example_phrases: &[
        "the gap stabilised at two minutes with 60 km to go",
        "held a steady 280 watts on the lower slopes",
        "the peloton swept up the last survivors inside the final kilometre",
    ],
    technical_density: (0.015, 0.10),
    target_words: (350, 700),
};

const DRAMATIC: StyleProfile = StyleProfile {
    voice: Voice::ThirdPerson,
    tense: Tense::Present,
    tone: "high tension, cinematic, short punchy sentences at the decisive moments",
    example_phrases: &[
        "the legs scream, the road tilts, and there is nowhere to hide",
        "one pedal stroke at a time, the line comes closer",
        "the race explodes",
    ],
    technical_density: (0.0, 0.06),
    target_words: (400, 800),
};

/// Narrative style identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Literary,
    Reportage,
    Dramatic,
}

impl Style {
    pub const ALL: [Style; 3] = [Self::Literary, Self::Reportage, Self::Dramatic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Literary => "literary",
            Self::Reportage => "reportage",
            Self::Dramatic => "dramatic",
        }
    }

    /// The fixed configuration record for this style.
    pub fn profile(&self) -> &'static StyleProfile {
        match self {
            Self::Literary => &LITERARY,
            Self::Reportage => &REPORTAGE,
            Self::Dramatic => &DRAMATIC,
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = StagecraftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "literary" => Ok(Self::Literary),
            "reportage" | "report" => Ok(Self::Reportage),
            "dramatic" | "drama" => Ok(Self::Dramatic),
            other => Err(StagecraftError::validation(format!(
                "unknown style '{other}': expected literary, reportage, or dramatic"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery formats
// ---------------------------------------------------------------------------

/// Output format for a delivered story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFormat {
    /// Markdown.
    Markup,
    /// Standalone styled HTML.
    Document,
    /// Plain text for a notification channel.
    Message,
    /// JSON with full analysis and editing detail.
    Structured,
}

impl DeliveryFormat {
    pub const ALL: [DeliveryFormat; 4] = [
        Self::Markup,
        Self::Document,
        Self::Message,
        Self::Structured,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Document => "document",
            Self::Message => "message",
            Self::Structured => "structured",
        }
    }

    /// Archive file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markup => "md",
            Self::Document => "html",
            Self::Message => "txt",
            Self::Structured => "json",
        }
    }
}

impl fmt::Display for DeliveryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryFormat {
    type Err = StagecraftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markup" | "markdown" | "md" => Ok(Self::Markup),
            "document" | "html" => Ok(Self::Document),
            "message" | "text" | "sms" => Ok(Self::Message),
            "structured" | "json" => Ok(Self::Structured),
            other => Err(StagecraftError::validation(format!(
                "unknown format '{other}': expected markup, document, message, or structured"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Drafts and editing
// ---------------------------------------------------------------------------

/// Raw writer output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeDraft {
    pub text: String,
    pub style: Style,
    pub provenance: Provenance,
}

/// Three independent quality dimensions, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub style: f64,
    pub factual_accuracy: f64,
    pub readability: f64,
}

impl QualityScores {
    pub fn min(&self) -> f64 {
        self.style.min(self.factual_accuracy).min(self.readability)
    }

    pub fn mean(&self) -> f64 {
        (self.style + self.factual_accuracy + self.readability) / 3.0
    }
}

/// Final outcome of the editing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditingReport {
    pub original_text: String,
    pub edited_text: String,
    pub scores: QualityScores,
    pub issues: Vec<String>,
    /// Human-readable log of what was attempted in each iteration.
    pub improvements: Vec<String>,
    /// Rewrite iterations performed; never above `max_iterations`.
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub quality_threshold: f64,
    pub threshold_met: bool,
    pub feedback_applied: bool,
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// One rendered story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredArtifact {
    pub title: String,
    pub content: String,
    pub format: DeliveryFormat,
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub generated_at: DateTime<Utc>,
}
