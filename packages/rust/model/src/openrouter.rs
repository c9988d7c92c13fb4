//! OpenRouter chat-completions client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use stagecraft_shared::{ModelConfig, Result, StagecraftError};

use crate::{Generation, GenerationFailure, GenerationRequest, TextGenerator};

/// User-Agent sent with model requests.
const USER_AGENT: &str = concat!("Stagecraft/", env!("CARGO_PKG_VERSION"));

/// OpenAI-compatible chat-completions client pointed at OpenRouter.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenRouterClient {
    /// Build from the `[model]` config section, reading the key from its env var.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                StagecraftError::config(format!(
                    "model API key not found in {}",
                    config.api_key_env
                ))
            })?;
        Self::new(config, api_key)
    }

    /// Build with an explicit key.
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                StagecraftError::ExternalService(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: config.endpoint.clone(),
            model: config.default_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn payload(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });
        if request.json {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        payload
    }
}

/// Pull the completion text and token usage out of a chat-completions body.
fn parse_completion(
    json: &serde_json::Value,
) -> std::result::Result<(String, u64, u64), GenerationFailure> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(GenerationFailure::Service(message.to_string()));
    }

    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .unwrap_or("");
    if content.is_empty() {
        return Err(GenerationFailure::Parse("empty completion".into()));
    }

    let tokens_in = json["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
    let tokens_out = json["usage"]["completion_tokens"].as_u64().unwrap_or(0);
    Ok((content.to_string(), tokens_in, tokens_out))
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(task = %request.task, model = %self.model))]
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationFailure> {
        let started = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Stagecraft")
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| GenerationFailure::Service(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "model request rejected");
            return Err(GenerationFailure::Service(format!(
                "HTTP {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationFailure::Parse(e.to_string()))?;
        let (text, tokens_in, tokens_out) = parse_completion(&json)?;

        debug!(
            tokens_in,
            tokens_out,
            latency_ms = started.elapsed().as_millis() as u64,
            "model call complete"
        );

        Ok(Generation {
            text,
            model: json["model"].as_str().unwrap_or(&self.model).to_string(),
            tokens_in,
            tokens_out,
            cached: false,
        })
    }
}
