//! Query path: embed → filter → search → score → rank → enrich.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use revu_llm::EmbeddingProvider;
use revu_memory::{SearchRequest, VectorStore};
use serde::{Deserialize, Serialize};

use crate::chunker::CodeChunk;
use crate::error::{IndexError, Result};
use crate::insights::{Insight, InsightIndex};
use crate::languages::Lang;
use crate::payload::{ChunkPayload, Provenance};
use crate::query::{RetrievalFilter, Selectivity, build_filter};
use crate::scoring::{CustomWeights, HybridScore, ScoringQuery, ScoringWeights, rank_by_score, score};

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "how", "does", "what",
    "where", "why", "when", "which", "into", "over", "all", "any", "not", "use", "used",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub collection: String,
    pub top_k: usize,
    pub min_score: f32,
    pub include_insights: bool,
    pub weights: ScoringWeights,
    /// Deadline for each embedding, search and insight call.
    pub timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            collection: "revu_code_chunks".into(),
            top_k: 10,
            min_score: 0.25,
            include_insights: true,
            weights: ScoringWeights::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// A retrieval request. Exactly one of `text` and `vector` must be set.
#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub filter: RetrievalFilter,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    /// Candidates requested from the store; defaults to twice `top_k`.
    pub max_results: Option<usize>,
    pub collection: Option<String>,
    pub weights: Option<ScoringWeights>,
    pub custom_weights: CustomWeights,
    pub include_insights: Option<bool>,
    /// Reference time for recency; defaults to the current time.
    pub now: Option<DateTime<Utc>>,
}

impl RetrievalQuery {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn vector(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: RetrievalFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    #[must_use]
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// Stages of a retrieval call, emitted at `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    Validating,
    Embedding,
    Filtering,
    Searching,
    Scoring,
    Ranking,
    EnrichingInsights,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: CodeChunk,
    pub provenance: Provenance,
    /// Final ranking score, equal to `hybrid.total`.
    pub score: f32,
    /// Similarity reported by the vector search.
    pub semantic_score: f32,
    pub hybrid: HybridScore,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    /// Hits returned by the store before ranking and truncation.
    pub total_candidates: usize,
    /// Hits dropped for failing payload validation.
    pub rejected_hits: usize,
    pub applied_filters: Vec<String>,
    pub warnings: Vec<String>,
    pub selectivity: Selectivity,
    pub duration_ms: u64,
}

struct Normalized {
    top_k: usize,
    min_score: f32,
    max_results: usize,
    collection: String,
    include_insights: bool,
    weights: ScoringWeights,
    now: DateTime<Utc>,
}

/// Semantic code retriever with hybrid re-ranking.
pub struct CodeRetriever<E: EmbeddingProvider> {
    store: Arc<dyn VectorStore>,
    embedder: Arc<E>,
    insights: Option<Arc<dyn InsightIndex>>,
    config: RetrieverConfig,
}

impl<E: EmbeddingProvider> CodeRetriever<E> {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<E>, config: RetrieverConfig) -> Self {
        Self {
            store,
            embedder,
            insights: None,
            config,
        }
    }

    #[must_use]
    pub fn with_insights(mut self, index: Arc<dyn InsightIndex>) -> Self {
        self.insights = Some(index);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Run a query end to end.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] for a malformed query,
    /// [`IndexError::Timeout`] when an external call exceeds the configured
    /// deadline, and embedding or store errors otherwise. Insight lookup
    /// failures are logged and do not fail the query.
    pub async fn retrieve(&self, query: RetrievalQuery) -> Result<RetrievalResult> {
        let start = Instant::now();
        match self.run(query, start).await {
            Ok(result) => {
                stage(RetrievalStage::Done);
                tracing::debug!(
                    returned = result.chunks.len(),
                    candidates = result.total_candidates,
                    duration_ms = result.duration_ms,
                    "retrieval finished"
                );
                Ok(result)
            }
            Err(e) => {
                stage(RetrievalStage::Failed);
                tracing::debug!("retrieval failed: {e}");
                Err(e)
            }
        }
    }

    /// # Errors
    ///
    /// See [`retrieve`](Self::retrieve).
    pub async fn retrieve_in_file(
        &self,
        mut query: RetrievalQuery,
        path: &str,
    ) -> Result<RetrievalResult> {
        query.filter.files = vec![path.to_owned()];
        self.retrieve(query).await
    }

    /// # Errors
    ///
    /// See [`retrieve`](Self::retrieve).
    pub async fn retrieve_by_language(
        &self,
        mut query: RetrievalQuery,
        lang: Lang,
    ) -> Result<RetrievalResult> {
        query.filter.languages = vec![lang];
        self.retrieve(query).await
    }

    /// # Errors
    ///
    /// See [`retrieve`](Self::retrieve).
    pub async fn retrieve_by_commit(
        &self,
        mut query: RetrievalQuery,
        commit: &str,
    ) -> Result<RetrievalResult> {
        query.filter.commits = vec![commit.to_owned()];
        self.retrieve(query).await
    }

    /// # Errors
    ///
    /// See [`retrieve`](Self::retrieve).
    pub async fn retrieve_in_directory(
        &self,
        mut query: RetrievalQuery,
        prefix: &str,
    ) -> Result<RetrievalResult> {
        query.filter.file_patterns = RetrievalFilter::in_directory(prefix).file_patterns;
        self.retrieve(query).await
    }

    async fn run(&self, query: RetrievalQuery, start: Instant) -> Result<RetrievalResult> {
        stage(RetrievalStage::Validating);
        let params = self.normalize(&query)?;

        stage(RetrievalStage::Embedding);
        let vector = match (&query.text, query.vector) {
            (Some(text), _) => {
                with_timeout("embed query", self.config.timeout, self.embedder.embed(text)).await??
            }
            (None, Some(vector)) => vector,
            (None, None) => {
                return Err(IndexError::validation("query", "text or vector is required"));
            }
        };

        stage(RetrievalStage::Filtering);
        let built = build_filter(&query.filter, params.now)?;

        stage(RetrievalStage::Searching);
        let mut result = RetrievalResult {
            chunks: Vec::new(),
            total_candidates: 0,
            rejected_hits: 0,
            applied_filters: built.applied_filters,
            warnings: built.warnings,
            selectivity: built.selectivity,
            duration_ms: 0,
        };
        let exists = with_timeout(
            "collection lookup",
            self.config.timeout,
            self.store.collection_exists(&params.collection),
        )
        .await??;
        if !exists {
            tracing::debug!(collection = %params.collection, "collection missing, nothing to retrieve");
            result.duration_ms = elapsed_ms(start);
            return Ok(result);
        }

        let request = SearchRequest::new(vector, params.max_results as u64)
            .with_filter(built.filter.clone())
            .with_score_threshold(params.min_score);
        let hits = with_timeout(
            "vector search",
            self.config.timeout,
            self.store.search(&params.collection, request),
        )
        .await??;
        result.total_candidates = hits.len();

        stage(RetrievalStage::Scoring);
        let mut scoring = ScoringQuery::new(params.now).with_terms(
            query.text.as_deref().map(query_terms).unwrap_or_default(),
        );
        scoring.languages.clone_from(&query.filter.languages);
        scoring.files.clone_from(&query.filter.files);
        scoring.weights = params.weights;
        scoring.custom = query.custom_weights;

        for hit in hits {
            // backends may approximate glob clauses; re-check exactly
            if !built.filter.matches(&hit.payload) {
                tracing::debug!(id = %hit.id, "hit outside filter after exact check");
                continue;
            }
            let payload = match ChunkPayload::from_payload(&hit.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(id = %hit.id, "rejecting hit with invalid payload: {e}");
                    result.rejected_hits += 1;
                    continue;
                }
            };
            let provenance = Provenance {
                commit: payload.commit.clone(),
                author: payload.author.clone(),
                created_at: payload.created_at(),
            };
            let chunk = payload.into_chunk();
            let hybrid = score(&chunk, hit.score, provenance.created_at, &scoring);
            result.chunks.push(RetrievedChunk {
                chunk,
                provenance,
                score: hybrid.total,
                semantic_score: hit.score,
                hybrid,
                insights: Vec::new(),
            });
        }

        stage(RetrievalStage::Ranking);
        rank_by_score(&mut result.chunks, |c| c.score);
        result.chunks.truncate(params.top_k);

        if params.include_insights
            && let Some(index) = &self.insights
            && !result.chunks.is_empty()
        {
            stage(RetrievalStage::EnrichingInsights);
            self.attach_insights(index.as_ref(), &mut result.chunks).await;
        }

        result.duration_ms = elapsed_ms(start);
        Ok(result)
    }

    fn normalize(&self, query: &RetrievalQuery) -> Result<Normalized> {
        match (&query.text, &query.vector) {
            (Some(_), Some(_)) => {
                return Err(IndexError::validation(
                    "query",
                    "provide either text or a vector, not both",
                ));
            }
            (None, None) => {
                return Err(IndexError::validation("query", "text or vector is required"));
            }
            (Some(text), None) if text.trim().is_empty() => {
                return Err(IndexError::validation("text", "must not be blank"));
            }
            (None, Some(vector)) if vector.is_empty() => {
                return Err(IndexError::validation("vector", "must not be empty"));
            }
            _ => {}
        }

        let top_k = query.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(IndexError::validation("top_k", "must be at least 1"));
        }
        let min_score = query.min_score.unwrap_or(self.config.min_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(IndexError::validation(
                "min_score",
                format!("must be within [0, 1], got {min_score}"),
            ));
        }
        let weights = query.weights.unwrap_or(self.config.weights);
        weights.validate()?;
        query.custom_weights.validate()?;

        let collection = query
            .collection
            .clone()
            .unwrap_or_else(|| self.config.collection.clone());
        if collection.is_empty() {
            return Err(IndexError::validation("collection", "must not be empty"));
        }

        Ok(Normalized {
            top_k,
            min_score,
            max_results: query.max_results.unwrap_or(top_k * 2).max(top_k),
            collection,
            include_insights: query.include_insights.unwrap_or(self.config.include_insights),
            weights,
            now: query.now.unwrap_or_else(Utc::now),
        })
    }

    async fn attach_insights(&self, index: &dyn InsightIndex, chunks: &mut [RetrievedChunk]) {
        let mut seen = HashSet::new();
        let files: Vec<String> = chunks
            .iter()
            .filter(|c| seen.insert(c.chunk.file_path.clone()))
            .map(|c| c.chunk.file_path.clone())
            .collect();

        let insights = match with_timeout("insight lookup", self.config.timeout, index.search(&files))
            .await
        {
            Ok(Ok(insights)) => insights,
            Ok(Err(e)) | Err(e) => {
                tracing::warn!("insight enrichment skipped: {e}");
                return;
            }
        };

        for retrieved in chunks {
            let chunk = &retrieved.chunk;
            retrieved.insights = insights
                .iter()
                .filter(|i| i.file == chunk.file_path && i.overlaps(chunk.start_line, chunk.end_line))
                .cloned()
                .collect();
            retrieved
                .insights
                .sort_by(|a, b| b.severity.cmp(&a.severity).then(a.line.cmp(&b.line)));
        }
    }
}

fn stage(stage: RetrievalStage) {
    tracing::debug!(stage = ?stage, "retrieval stage");
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| IndexError::Timeout {
            operation: operation.to_owned(),
        })
}

/// Lowercased search terms from free text. Identifier-looking words
/// (`CamelCase`, `snake_case`, `a::b`) also contribute their parts.
#[must_use]
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |term: String| {
        if term.len() >= 3 && !STOP_WORDS.contains(&term.as_str()) && seen.insert(term.clone()) {
            terms.push(term);
        }
    };

    for word in text.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != ':');
        if word.is_empty() {
            continue;
        }
        if is_identifier_like(word) {
            for part in word.split("::").filter(|p| !p.is_empty()) {
                push(part.to_lowercase());
            }
            for part in revu_llm::hashing::tokenize(word) {
                push(part);
            }
        } else {
            push(word.to_lowercase());
        }
    }
    terms
}

fn is_identifier_like(word: &str) -> bool {
    word.contains("::") || has_camel_case(word) || has_snake_case(word)
}

fn has_camel_case(word: &str) -> bool {
    let chars: Vec<char> = word.chars().collect();
    chars.len() >= 3
        && chars.iter().any(|c| c.is_lowercase())
        && chars.iter().skip(1).any(|c| c.is_uppercase())
}

fn has_snake_case(word: &str) -> bool {
    word.len() >= 3
        && word.contains('_')
        && word.chars().all(|c| c.is_alphanumeric() || c == '_')
        && word.starts_with(|c: char| c.is_lowercase())
}

#[cfg(test)]
mod tests {
    use revu_llm::mock::MockProvider;
    use revu_memory::{InMemoryVectorStore, VectorPoint};

    use super::*;
    use crate::chunker::{ChunkType, chunk_id};
    use crate::insights::{Severity, StaticInsightIndex};
    use crate::payload::chunk_collection_schema;

    const COLLECTION: &str = "revu_code_chunks";

    fn chunk(path: &str, start: usize, end: usize, lang: Lang) -> CodeChunk {
        CodeChunk {
            id: chunk_id(path, start, end),
            content: format!("fn handler_{start}() {{ verify_token(); }}"),
            language: lang,
            start_line: start,
            end_line: end,
            chunk_type: ChunkType::Function,
            complexity_score: 2,
            dependencies: vec!["verify_token".into()],
            imports: vec![],
            file_path: path.into(),
            name: Some(format!("handler_{start}")),
            content_hash: format!("hash-{path}-{start}"),
            embedding: None,
        }
    }

    async fn seeded_store(points: Vec<(CodeChunk, Vec<f32>)>) -> Arc<dyn VectorStore> {
        let store = InMemoryVectorStore::new();
        store
            .create_collection(chunk_collection_schema(COLLECTION, 2))
            .await
            .unwrap();
        let points = points
            .into_iter()
            .map(|(c, vector)| VectorPoint {
                id: c.id.clone(),
                vector,
                payload: ChunkPayload::from_chunk(&c, &Provenance::default())
                    .to_payload()
                    .unwrap(),
            })
            .collect();
        store.upsert(COLLECTION, points).await.unwrap();
        Arc::new(store)
    }

    fn retriever(store: Arc<dyn VectorStore>) -> CodeRetriever<MockProvider> {
        let embedder = Arc::new(MockProvider::default().with_embedding(vec![1.0, 0.0]));
        CodeRetriever::new(store, embedder, RetrieverConfig::default())
    }

    #[tokio::test]
    async fn ranks_by_similarity_and_truncates() {
        let store = seeded_store(vec![
            (chunk("src/a.rs", 1, 10, Lang::Rust), vec![0.6, 0.8]),
            (chunk("src/b.rs", 1, 10, Lang::Rust), vec![1.0, 0.0]),
            (chunk("src/c.rs", 1, 10, Lang::Rust), vec![0.8, 0.6]),
        ])
        .await;
        let result = retriever(store)
            .retrieve(RetrievalQuery::text("token handler").with_top_k(2))
            .await
            .unwrap();
        assert_eq!(result.total_candidates, 3);
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0].chunk.file_path, "src/b.rs");
        assert_eq!(result.chunks[1].chunk.file_path, "src/c.rs");
        assert!(result.chunks[0].score >= result.chunks[1].score);
    }

    #[tokio::test]
    async fn min_score_drops_weak_hits() {
        let store = seeded_store(vec![
            (chunk("src/a.rs", 1, 10, Lang::Rust), vec![0.0, 1.0]),
            (chunk("src/b.rs", 1, 10, Lang::Rust), vec![1.0, 0.0]),
        ])
        .await;
        let result = retriever(store)
            .retrieve(RetrievalQuery::vector(vec![1.0, 0.0]).with_min_score(0.5))
            .await
            .unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk.file_path, "src/b.rs");
    }

    #[tokio::test]
    async fn filters_apply_before_ranking() {
        let store = seeded_store(vec![
            (chunk("src/a.py", 1, 10, Lang::Python), vec![1.0, 0.0]),
            (chunk("src/b.rs", 1, 10, Lang::Rust), vec![0.9, 0.1]),
        ])
        .await;
        let r = retriever(store);
        let result = r
            .retrieve_by_language(RetrievalQuery::text("handler"), Lang::Rust)
            .await
            .unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk.language, Lang::Rust);
        assert_eq!(result.applied_filters, vec!["languages: rust"]);

        let in_dir = r
            .retrieve_in_directory(RetrievalQuery::text("handler"), "src")
            .await
            .unwrap();
        assert_eq!(in_dir.chunks.len(), 2);
    }

    #[tokio::test]
    async fn missing_collection_is_an_empty_result() {
        let r = retriever(Arc::new(InMemoryVectorStore::new()));
        let result = r.retrieve(RetrievalQuery::text("anything")).await.unwrap();
        assert!(result.chunks.is_empty());
        assert_eq!(result.total_candidates, 0);
    }

    #[tokio::test]
    async fn query_shape_is_validated() {
        let r = retriever(Arc::new(InMemoryVectorStore::new()));
        let both = RetrievalQuery {
            text: Some("x".into()),
            vector: Some(vec![1.0]),
            ..RetrievalQuery::default()
        };
        assert!(matches!(r.retrieve(both).await, Err(IndexError::Validation { .. })));
        assert!(matches!(
            r.retrieve(RetrievalQuery::default()).await,
            Err(IndexError::Validation { .. })
        ));
        assert!(matches!(
            r.retrieve(RetrievalQuery::text("x").with_top_k(0)).await,
            Err(IndexError::Validation { .. })
        ));
        assert!(matches!(
            r.retrieve(RetrievalQuery::text("x").with_min_score(1.5)).await,
            Err(IndexError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let store = seeded_store(vec![]).await;
        let r = CodeRetriever::new(
            store,
            Arc::new(MockProvider::failing_embeddings()),
            RetrieverConfig::default(),
        );
        let err = r.retrieve(RetrievalQuery::text("x")).await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_embedder_times_out() {
        let store = seeded_store(vec![]).await;
        let config = RetrieverConfig {
            timeout: Duration::from_millis(50),
            ..RetrieverConfig::default()
        };
        let r = CodeRetriever::new(store, Arc::new(MockProvider::default().with_delay(500)), config);
        let err = r.retrieve(RetrievalQuery::text("x")).await.unwrap_err();
        assert!(matches!(err, IndexError::Timeout { ref operation } if operation == "embed query"));
    }

    #[tokio::test]
    async fn invalid_payloads_are_counted() {
        let store = InMemoryVectorStore::new();
        store
            .create_collection(chunk_collection_schema(COLLECTION, 2))
            .await
            .unwrap();
        let mut payload = ChunkPayload::from_chunk(&chunk("src/a.rs", 1, 5, Lang::Rust), &Provenance::default())
            .to_payload()
            .unwrap();
        payload.insert("legacy_field".into(), serde_json::json!(1));
        store
            .upsert(
                COLLECTION,
                vec![VectorPoint {
                    id: "bad".into(),
                    vector: vec![1.0, 0.0],
                    payload,
                }],
            )
            .await
            .unwrap();
        let result = retriever(Arc::new(store))
            .retrieve(RetrievalQuery::text("x"))
            .await
            .unwrap();
        assert_eq!(result.rejected_hits, 1);
        assert!(result.chunks.is_empty());
    }

    #[tokio::test]
    async fn overlapping_insights_are_attached() {
        let store = seeded_store(vec![(chunk("src/a.rs", 10, 20, Lang::Rust), vec![1.0, 0.0])]).await;
        let insight = |line, severity| Insight {
            file: "src/a.rs".into(),
            line,
            end_line: None,
            category: "bug".into(),
            severity,
            summary: format!("line {line}"),
            suggestion: None,
        };
        let index = StaticInsightIndex::new(vec![
            insight(12, Severity::Low),
            insight(15, Severity::High),
            insight(40, Severity::Critical),
        ]);
        let r = retriever(store).with_insights(Arc::new(index));
        let result = r.retrieve(RetrievalQuery::text("handler")).await.unwrap();
        let attached: Vec<usize> = result.chunks[0].insights.iter().map(|i| i.line).collect();
        assert_eq!(attached, vec![15, 12]);

        let skipped = r
            .retrieve(RetrievalQuery {
                include_insights: Some(false),
                ..RetrievalQuery::text("handler")
            })
            .await
            .unwrap();
        assert!(skipped.chunks[0].insights.is_empty());
    }

    #[test]
    fn query_terms_split_identifiers() {
        let terms = query_terms("where is SessionStore::refresh_token used?");
        assert!(terms.contains(&"sessionstore".to_string()));
        assert!(terms.contains(&"session".to_string()));
        assert!(terms.contains(&"refresh_token".to_string()));
        assert!(terms.contains(&"refresh".to_string()));
        assert!(!terms.contains(&"where".to_string()));
        assert!(!terms.contains(&"is".to_string()));
    }

    #[test]
    fn identifier_detection() {
        assert!(has_camel_case("HttpClient"));
        assert!(!has_camel_case("HTTP"));
        assert!(has_snake_case("my_function"));
        assert!(!has_snake_case("NoSnake"));
        assert!(is_identifier_like("a::b"));
    }
}
