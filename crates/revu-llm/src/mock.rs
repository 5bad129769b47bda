//! Test-only mock provider implementing both embedding and generation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{EmbedBatch, EmbedInput, EmbedOutput, EmbeddingProvider, LlmProvider};

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    embed_calls: Arc<AtomicUsize>,
    pub default_response: String,
    pub embedding: Vec<f32>,
    /// Batch inputs whose text contains any of these markers fail individually.
    pub fail_markers: HashSet<String>,
    pub fail_embed: bool,
    pub fail_generate: bool,
    /// Milliseconds to sleep before answering.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            default_response: "mock review".into(),
            embedding: vec![0.1; 8],
            fail_markers: HashSet::new(),
            fail_embed: false,
            fail_generate: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    #[must_use]
    pub fn failing_embeddings() -> Self {
        Self {
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_fail_marker(mut self, marker: &str) -> Self {
        self.fail_markers.insert(marker.to_owned());
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of `embed`/`embed_batch` calls observed so far.
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Prompts received by `generate`, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }

    fn should_fail(&self, text: &str) -> bool {
        self.fail_markers.iter().any(|m| text.contains(m.as_str()))
    }
}

impl EmbeddingProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn model(&self) -> &str {
        "mock-embedding"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_embed || self.should_fail(text) {
            return Err(LlmError::Embedding("mock embedding error".into()));
        }
        Ok(self.embedding.clone())
    }

    async fn embed_batch(&self, inputs: &[EmbedInput]) -> Result<EmbedBatch, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_embed {
            return Err(LlmError::Unavailable);
        }
        let mut batch = EmbedBatch::default();
        for input in inputs {
            if self.should_fail(&input.text) {
                batch.errors.push(format!("{}: mock embedding error", input.id));
                batch
                    .results
                    .push(EmbedOutput::failed(&input.id, "mock embedding error"));
            } else {
                batch
                    .results
                    .push(EmbedOutput::ok(&input.id, self.embedding.clone()));
            }
        }
        Ok(batch)
    }
}

impl LlmProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.pause().await;
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_owned());
        }
        if self.fail_generate {
            return Err(LlmError::Generation("mock generation error".into()));
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|e| LlmError::Other(e.to_string()))?;
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_pops_queued_responses_then_default() {
        let mock = MockProvider::with_responses(vec!["first".into()]);
        assert_eq!(mock.generate("p1").await.unwrap(), "first");
        assert_eq!(mock.generate("p2").await.unwrap(), "mock review");
        assert_eq!(mock.prompts(), vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn batch_marks_items_with_fail_marker() {
        let mock = MockProvider::default().with_fail_marker("BROKEN");
        let batch = mock
            .embed_batch(&[
                EmbedInput::new("1", "fine"),
                EmbedInput::new("2", "BROKEN text"),
            ])
            .await
            .unwrap();
        assert!(batch.results[0].is_ok());
        assert!(!batch.results[1].is_ok());
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(mock.embed_calls(), 1);
    }

    #[tokio::test]
    async fn failing_embeddings_fail_whole_batch() {
        let mock = MockProvider::failing_embeddings();
        let result = mock.embed_batch(&[EmbedInput::new("1", "x")]).await;
        assert!(matches!(result, Err(LlmError::Unavailable)));
    }
}
