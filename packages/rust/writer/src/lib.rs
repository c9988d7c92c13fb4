//! Writer Agent: draft prose in one of the catalogue styles.
//!
//! The style descriptor is resolved once per draft from
//! [`Style::profile`](stagecraft_shared::Style::profile). The model is asked
//! first; any failure falls back to a fixed template. Both paths finish with
//! placeholder substitution so no `{winner}`-style tokens reach the editor.

pub mod placeholders;
mod prompt;
pub mod template;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use stagecraft_model::{GenerationFailure, GenerationRequest, TextGenerator, tasks};
use stagecraft_shared::{AnalysisResult, NarrativeDraft, Provenance, Style};

pub use placeholders::{PlaceholderValues, substitute_placeholders};
pub use template::template_draft;

/// Model drafts shorter than this are treated as failures.
const MIN_MODEL_WORDS: usize = 60;

/// Produces a [`NarrativeDraft`] from an analysis.
pub struct WriterAgent {
    generator: Arc<dyn TextGenerator>,
    rider: String,
}

impl WriterAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, rider: impl Into<String>) -> Self {
        Self {
            generator,
            rider: rider.into(),
        }
    }

    #[instrument(skip_all, fields(%style, event_number = analysis.event.event_number))]
    pub async fn generate(
        &self,
        analysis: &AnalysisResult,
        style: Style,
        rider_context: Option<&str>,
    ) -> NarrativeDraft {
        let profile = style.profile();
        let request = GenerationRequest::new(
            tasks::WRITE_DRAFT,
            prompt::system_prompt(profile),
            prompt::draft_prompt(analysis, profile, &self.rider, rider_context),
        );

        let (raw, provenance) = match self.generator.generate(&request).await {
            Ok(generation) => match clean_model_text(&generation.text) {
                Some(text) => (text, Provenance::Model),
                None => {
                    warn!(
                        words = generation.text.split_whitespace().count(),
                        "model draft too short, using template"
                    );
                    (template_draft(analysis, style, &self.rider), Provenance::Fallback)
                }
            },
            Err(GenerationFailure::Disabled) => {
                (template_draft(analysis, style, &self.rider), Provenance::Fallback)
            }
            Err(e) => {
                warn!(error = %e, "draft generation failed, using template");
                (template_draft(analysis, style, &self.rider), Provenance::Fallback)
            }
        };

        let values = PlaceholderValues::from_analysis(analysis, &self.rider);
        let text = substitute_placeholders(&raw, &values);
        info!(
            words = text.split_whitespace().count(),
            source = ?provenance,
            "draft written"
        );

        NarrativeDraft {
            text,
            style,
            provenance,
        }
    }
}

/// Strip wrapping fences and headings; `None` when too short to be a story.
fn clean_model_text(text: &str) -> Option<String> {
    let body: Vec<&str> = text
        .trim()
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect();
    let body = body.join("\n").trim().to_string();
    (body.split_whitespace().count() >= MIN_MODEL_WORDS).then_some(body)
}
