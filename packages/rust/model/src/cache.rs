//! Generation cache wrapper backed by [`Storage`].

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use stagecraft_storage::Storage;

use crate::{Generation, GenerationFailure, GenerationRequest, TextGenerator};

/// Compute a prompt hash for cache keying.
pub fn prompt_hash(request: &GenerationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.system.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.prompt.as_bytes());
    hasher.update([u8::from(request.json)]);
    format!("{:x}", hasher.finalize())
}

/// Serves repeated prompts from the cache; misses go to the wrapped generator.
///
/// Cache read or write errors are logged and otherwise ignored.
pub struct CachedGenerator<G> {
    inner: G,
    storage: Arc<Storage>,
}

impl<G: TextGenerator> CachedGenerator<G> {
    pub fn new(inner: G, storage: Arc<Storage>) -> Self {
        Self { inner, storage }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for CachedGenerator<G> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationFailure> {
        let hash = prompt_hash(request);
        let model_id = self.inner.model_id().to_string();

        match self
            .storage
            .get_generation_cache(&request.task, &hash, &model_id)
            .await
        {
            Ok(Some(text)) => {
                debug!(task = %request.task, "generation cache hit");
                return Ok(Generation {
                    text,
                    model: model_id,
                    tokens_in: 0,
                    tokens_out: 0,
                    cached: true,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "generation cache lookup failed"),
        }

        let generation = self.inner.generate(request).await?;

        if let Err(e) = self
            .storage
            .set_generation_cache(&request.task, &hash, &model_id, &generation.text)
            .await
        {
            warn!(error = %e, "failed to store generation in cache");
        }
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScriptedGenerator, tasks};

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("sc_model_{}.db", uuid::Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let storage = test_storage().await;
        // Only one scripted response: a second upstream call would fail
        let scripted = ScriptedGenerator::new().with_response(tasks::WRITE_DRAFT, "The road rose.");
        let cached = CachedGenerator::new(scripted, storage);

        let req = GenerationRequest::new(tasks::WRITE_DRAFT, "sys", "stage 4 prompt");
        let first = cached.generate(&req).await.unwrap();
        assert!(!first.cached);

        let second = cached.generate(&req).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.text, "The road rose.");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let storage = test_storage().await;
        let scripted = ScriptedGenerator::new()
            .with_failure(tasks::WRITE_DRAFT, GenerationFailure::Service("boom".into()))
            .with_response(tasks::WRITE_DRAFT, "Recovered.");
        let cached = CachedGenerator::new(scripted, storage);

        let req = GenerationRequest::new(tasks::WRITE_DRAFT, "sys", "prompt");
        assert!(cached.generate(&req).await.is_err());
        let ok = cached.generate(&req).await.unwrap();
        assert_eq!(ok.text, "Recovered.");
        assert!(!ok.cached);
    }

    #[test]
    fn hash_depends_on_prompt_and_mode() {
        let a = GenerationRequest::new(tasks::ASSIGN_ROLE, "sys", "p1");
        let b = GenerationRequest::new(tasks::ASSIGN_ROLE, "sys", "p2");
        assert_ne!(prompt_hash(&a), prompt_hash(&b));
        assert_ne!(prompt_hash(&a), prompt_hash(&a.clone().expect_json()));
        assert_eq!(prompt_hash(&a).len(), 64);
    }
}
