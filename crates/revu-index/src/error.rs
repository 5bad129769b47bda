//! Error types for revu-index.

/// Errors that can occur while chunking, indexing, or retrieving code.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or cache snapshots.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A chunking strategy could not parse the input. Recovered by fallback.
    #[error("parse failed: {0}")]
    Parse(String),

    /// The strategy has no support for the detected language. Recovered by fallback.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// No chunking strategy is usable for the input.
    #[error("no usable chunking strategy for {0}")]
    NoStrategy(String),

    /// Embedding of a whole batch or of a query failed.
    #[error("embedding failed: {0}")]
    Embedding(#[from] revu_llm::LlmError),

    /// Vector store write or search failed.
    #[error("vector store error: {0}")]
    Store(#[from] revu_memory::VectorStoreError),

    /// Point payload failed schema validation.
    #[error("invalid payload: {0}")]
    Payload(#[from] revu_memory::PayloadError),

    /// Malformed query, filter or configuration.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// An external call exceeded its deadline.
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// Cooperative cancellation; never retried automatically.
    #[error("indexing aborted")]
    Aborted,

    /// Another indexing run holds the repository.
    #[error("an indexing run is already in progress")]
    IndexingInProgress,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IndexError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Aborted
                | Self::Validation { .. }
                | Self::NoStrategy(_)
                | Self::Payload(_)
                | Self::IndexingInProgress
        )
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_and_validation_are_not_retryable() {
        assert!(!IndexError::Aborted.is_retryable());
        assert!(!IndexError::validation("top_k", "must be positive").is_retryable());
        assert!(
            IndexError::Timeout {
                operation: "search".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn validation_message_names_field() {
        let err = IndexError::validation("min_score", "must be within [0, 1]");
        assert_eq!(err.to_string(), "invalid min_score: must be within [0, 1]");
    }
}
