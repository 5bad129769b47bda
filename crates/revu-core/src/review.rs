//! Review session: retrieve context for a change, compose a budgeted prompt,
//! and hand it to the generation model.

use std::collections::BTreeSet;
use std::time::Duration;

use revu_index::{CodeRetriever, IndexError, RetrievalFilter, RetrievalQuery, RetrievalResult};
use revu_llm::{EmbeddingProvider, LlmError, LlmProvider};

use crate::prompt::{ComposedPrompt, FileDiff, PromptComposer, PromptError, PromptInput};

/// Terms taken from a diff when no query text is supplied.
const MAX_DERIVED_TERMS: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("review request has neither a query nor any diffs")]
    EmptyRequest,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewRequest {
    /// Retrieval query. Derived from the diffs when absent.
    pub query: Option<String>,
    pub diffs: Vec<FileDiff>,
    pub filter: RetrievalFilter,
    pub preamble: Option<String>,
    pub instructions: Option<String>,
}

impl ReviewRequest {
    #[must_use]
    pub fn from_diffs(diffs: Vec<FileDiff>) -> Self {
        Self {
            diffs,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: RetrievalFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Retrieved context and the prompt built from it.
#[derive(Debug, Clone)]
pub struct PreparedReview {
    pub query: String,
    pub retrieval: RetrievalResult,
    pub prompt: ComposedPrompt,
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub response: String,
    pub prepared: PreparedReview,
}

pub struct ReviewSession<E: EmbeddingProvider, L: LlmProvider> {
    retriever: CodeRetriever<E>,
    composer: PromptComposer,
    llm: L,
    timeout: Duration,
}

impl<E: EmbeddingProvider, L: LlmProvider> ReviewSession<E, L> {
    #[must_use]
    pub fn new(retriever: CodeRetriever<E>, composer: PromptComposer, llm: L) -> Self {
        Self {
            retriever,
            composer,
            llm,
            timeout: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retrieve context for the request and compose the prompt, without
    /// calling the model.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::EmptyRequest`] if there is nothing to search
    /// for, and retrieval or composition errors otherwise.
    pub async fn prepare(&self, request: &ReviewRequest) -> Result<PreparedReview, ReviewError> {
        let query = match &request.query {
            Some(q) if !q.trim().is_empty() => q.clone(),
            _ => derive_query(&request.diffs).ok_or(ReviewError::EmptyRequest)?,
        };
        tracing::debug!(query = %query, diffs = request.diffs.len(), "preparing review");

        let retrieval = self
            .retriever
            .retrieve(RetrievalQuery::text(query.as_str()).with_filter(request.filter.clone()))
            .await?;
        let prompt = self.composer.compose(&PromptInput {
            preamble: request.preamble.as_deref(),
            chunks: &retrieval.chunks,
            diffs: &request.diffs,
            instructions: request.instructions.as_deref(),
        })?;
        tracing::info!(
            chunks = prompt.metadata.chunks_included,
            tokens = prompt.token_count,
            truncated = prompt.metadata.truncated,
            "review prompt ready"
        );

        Ok(PreparedReview {
            query,
            retrieval,
            prompt,
        })
    }

    /// Prepare the prompt and generate the review.
    ///
    /// # Errors
    ///
    /// Everything [`prepare`](Self::prepare) returns, plus generation
    /// failures and [`ReviewError::Timeout`].
    pub async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, ReviewError> {
        let prepared = self.prepare(request).await?;
        let response = tokio::time::timeout(self.timeout, self.llm.generate(&prepared.prompt.text))
            .await
            .map_err(|_| ReviewError::Timeout(self.timeout))??;
        tracing::info!(provider = self.llm.name(), chars = response.len(), "review generated");
        Ok(ReviewOutcome { response, prepared })
    }
}

/// Query text for a change: the touched paths, then identifiers from the
/// added and removed lines.
#[must_use]
pub fn derive_query(diffs: &[FileDiff]) -> Option<String> {
    let mut seen = BTreeSet::new();
    let mut terms: Vec<String> = Vec::new();
    let mut push = |term: &str, terms: &mut Vec<String>| {
        if terms.len() < MAX_DERIVED_TERMS && seen.insert(term.to_owned()) {
            terms.push(term.to_owned());
        }
    };

    for diff in diffs {
        if !diff.path.trim().is_empty() {
            push(diff.path.trim(), &mut terms);
        }
    }
    for diff in diffs {
        for line in diff.patch.lines() {
            if line.starts_with("+++") || line.starts_with("---") {
                continue;
            }
            let Some(body) = line.strip_prefix('+').or_else(|| line.strip_prefix('-')) else {
                continue;
            };
            for word in body.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
                if word.chars().count() >= 3 && !word.chars().all(|c| c.is_ascii_digit()) {
                    push(word, &mut terms);
                }
            }
        }
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
