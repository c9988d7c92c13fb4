//! Scripted generator: canned responses per task.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Generation, GenerationFailure, GenerationRequest, TextGenerator};

type Script = HashMap<String, VecDeque<std::result::Result<String, GenerationFailure>>>;

/// Replays queued responses for each task label, in order.
///
/// A task with nothing queued fails with [`GenerationFailure::Disabled`], so
/// unscripted steps take their fallback path. Every request is recorded.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<Script>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for `task`.
    pub fn with_response(self, task: &str, text: impl Into<String>) -> Self {
        self.push(task, Ok(text.into()));
        self
    }

    /// Queue a failure for `task`.
    pub fn with_failure(self, task: &str, failure: GenerationFailure) -> Self {
        self.push(task, Err(failure));
        self
    }

    fn push(&self, task: &str, step: std::result::Result<String, GenerationFailure>) {
        if let Ok(mut script) = self.script.lock() {
            script.entry(task.to_string()).or_default().push_back(step);
        }
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of requests received for `task`.
    pub fn calls(&self, task: &str) -> usize {
        self.requests().iter().filter(|r| r.task == task).count()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationFailure> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let step = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.get_mut(&request.task)?.pop_front());

        match step {
            Some(Ok(text)) => Ok(Generation {
                text,
                model: "scripted".into(),
                tokens_in: 0,
                tokens_out: 0,
                cached: false,
            }),
            Some(Err(failure)) => Err(failure),
            None => Err(GenerationFailure::Disabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks;

    #[tokio::test]
    async fn replays_in_order_then_disables() {
        let generator = ScriptedGenerator::new()
            .with_response(tasks::WRITE_DRAFT, "one")
            .with_response(tasks::WRITE_DRAFT, "two");
        let req = GenerationRequest::new(tasks::WRITE_DRAFT, "s", "p");

        assert_eq!(generator.generate(&req).await.unwrap().text, "one");
        assert_eq!(generator.generate(&req).await.unwrap().text, "two");
        assert_eq!(
            generator.generate(&req).await.unwrap_err(),
            GenerationFailure::Disabled
        );
        assert_eq!(generator.calls(tasks::WRITE_DRAFT), 3);
        assert_eq!(generator.calls(tasks::ASSIGN_ROLE), 0);
    }
}
