//! Text-generation seam for Stagecraft.
//!
//! Every model-assisted step goes through [`TextGenerator`]. Calls return
//! `Result<Generation, GenerationFailure>` and callers pattern-match on the
//! failure to pick their deterministic fallback. Implementations:
//!
//! - [`OpenRouterClient`]: chat-completions over HTTP
//! - [`CachedGenerator`]: consults the libSQL generation cache first
//! - [`DisabledGenerator`]: always `Disabled`; forces every fallback path
//! - [`ScriptedGenerator`]: canned responses per task, for tests

mod cache;
mod json;
mod openrouter;
mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use stagecraft_shared::ModelConfig;

pub use cache::{CachedGenerator, prompt_hash};
pub use json::{extract_json, parse_json};
pub use openrouter::OpenRouterClient;
pub use scripted::ScriptedGenerator;

/// Task labels, used for cache keys, logging, and scripted test responses.
pub mod tasks {
    pub const SELECT_INTERVALS: &str = "select_intervals";
    pub const EXTRACT_EVENT: &str = "extract_event";
    pub const EXTRACT_INCIDENTS: &str = "extract_incidents";
    pub const ASSIGN_ROLE: &str = "assign_role";
    pub const MAP_INTERVALS: &str = "map_intervals";
    pub const WRITE_DRAFT: &str = "write_draft";
    pub const REWRITE_DRAFT: &str = "rewrite_draft";
    pub const APPLY_FEEDBACK: &str = "apply_feedback";
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Task label (see [`tasks`]).
    pub task: String,
    pub system: String,
    pub prompt: String,
    /// Ask the provider for a JSON object response.
    #[serde(default)]
    pub json: bool,
    /// Per-request temperature override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(task: &str, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task: task.to_string(),
            system: system.into(),
            prompt: prompt.into(),
            json: false,
            temperature: None,
        }
    }

    /// Request a JSON object response.
    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Served from the generation cache.
    #[serde(default)]
    pub cached: bool,
}

/// Why a model-assisted call produced nothing usable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationFailure {
    /// Model use is switched off or no credentials are configured.
    #[error("model disabled")]
    Disabled,

    /// Transport, HTTP, or provider-side error.
    #[error("model service error: {0}")]
    Service(String),

    /// The response could not be parsed into the expected shape.
    #[error("unparseable model response: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Generator trait
// ---------------------------------------------------------------------------

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, part of the cache key.
    fn model_id(&self) -> &str;

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationFailure>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationFailure> {
        (**self).generate(request).await
    }
}

/// Generate and deserialize a JSON response in one step.
///
/// The request is forced into JSON mode. Malformed output becomes
/// [`GenerationFailure::Parse`].
pub async fn generate_json<T: DeserializeOwned>(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
) -> std::result::Result<T, GenerationFailure> {
    let request = request.expect_json();
    let generation = generator.generate(&request).await?;
    parse_json(&generation.text)
}

/// Always returns [`GenerationFailure::Disabled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_id(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationFailure> {
        Err(GenerationFailure::Disabled)
    }
}

/// Build the generator described by the `[model]` config section.
///
/// A disabled section or a missing API key yields [`DisabledGenerator`]
/// so the run proceeds on deterministic fallbacks.
pub fn generator_from_config(config: &ModelConfig) -> Arc<dyn TextGenerator> {
    if !config.enabled {
        tracing::info!("model disabled by config, using deterministic fallbacks");
        return Arc::new(DisabledGenerator);
    }
    match OpenRouterClient::from_config(config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "model unavailable, using deterministic fallbacks");
            Arc::new(DisabledGenerator)
        }
    }
}
