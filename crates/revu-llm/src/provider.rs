use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// One text to embed, tagged with a caller-chosen id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedInput {
    pub id: String,
    pub text: String,
}

impl EmbedInput {
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Outcome for a single batch item. `vector` is empty when `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbedOutput {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbedOutput {
    #[must_use]
    pub fn ok(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector: Vec::new(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a batch embedding call.
///
/// `results` has one entry per input, in input order. `errors` collects the
/// human-readable messages of the failed items.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedBatch {
    pub results: Vec<EmbedOutput>,
    pub errors: Vec<String>,
}

impl EmbedBatch {
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }

    /// Whether every item of a non-empty batch failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.failed_count() == self.results.len()
    }
}

pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier recorded alongside cached vectors.
    fn model(&self) -> &str;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce a vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed many texts, recording failures per item instead of aborting.
    ///
    /// # Errors
    ///
    /// Returns an error only when the backend is unreachable as a whole.
    fn embed_batch(
        &self,
        inputs: &[EmbedInput],
    ) -> impl Future<Output = Result<EmbedBatch, LlmError>> + Send {
        async move {
            let mut batch = EmbedBatch::default();
            for input in inputs {
                match self.embed(&input.text).await {
                    Ok(vector) => batch.results.push(EmbedOutput::ok(&input.id, vector)),
                    Err(e) => {
                        tracing::debug!(id = %input.id, "embedding item failed: {e}");
                        batch.errors.push(format!("{}: {e}", input.id));
                        batch.results.push(EmbedOutput::failed(&input.id, e.to_string()));
                    }
                }
            }
            Ok(batch)
        }
    }
}

pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Generate a completion for a fully composed prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, LlmError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EvenOnly;

    impl EmbeddingProvider for EvenOnly {
        fn name(&self) -> &'static str {
            "even-only"
        }

        fn model(&self) -> &'static str {
            "test"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            if text.len() % 2 == 0 {
                Ok(vec![1.0, 0.0])
            } else {
                Err(LlmError::Embedding("odd length".into()))
            }
        }
    }

    #[tokio::test]
    async fn default_batch_records_partial_failures() {
        let inputs = vec![EmbedInput::new("a", "ab"), EmbedInput::new("b", "abc")];
        let batch = EvenOnly.embed_batch(&inputs).await.unwrap();

        assert_eq!(batch.results.len(), 2);
        assert!(batch.results[0].is_ok());
        assert_eq!(batch.results[0].vector, vec![1.0, 0.0]);
        assert!(!batch.results[1].is_ok());
        assert!(batch.results[1].vector.is_empty());
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.errors[0].starts_with("b:"));
        assert!(!batch.all_failed());
    }

    #[tokio::test]
    async fn all_failed_detects_total_failure() {
        let inputs = vec![EmbedInput::new("a", "a"), EmbedInput::new("b", "abc")];
        let batch = EvenOnly.embed_batch(&inputs).await.unwrap();
        assert!(batch.all_failed());
        assert_eq!(batch.failed_count(), 2);
    }

    #[test]
    fn empty_batch_is_not_all_failed() {
        assert!(!EmbedBatch::default().all_failed());
    }
}
