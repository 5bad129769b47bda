//! Code chunking, embedding cache, hybrid scoring and retrieval.
//!
//! Source files are split into chunks (tree-sitter AST where a grammar is
//! available, regex declaration patterns or line windows otherwise), embedded
//! through an [`revu_llm::EmbeddingProvider`] with a content-hash keyed cache,
//! and stored in a [`revu_memory::VectorStore`] under a versioned payload
//! schema. Queries are embedded, filtered, searched and re-ranked with a
//! multi-factor hybrid score, then enriched with prior-review insights.

pub mod cache;
pub mod chunker;
pub mod context;
pub mod error;
pub mod indexer;
pub mod insights;
pub mod languages;
pub mod payload;
pub mod query;
pub mod retriever;
pub mod scoring;

pub use cache::{CacheConfig, CacheEntry, CacheStats, EmbeddingCache};
pub use chunker::{
    ChunkType, ChunkerConfig, ChunkingResult, CodeChunk, Strategy, chunk_file, chunk_id,
    chunk_with_language,
};
pub use error::{IndexError, Result};
pub use indexer::{CodeIndexer, IndexReport, IndexerConfig};
pub use insights::{Insight, InsightIndex, Severity, StaticInsightIndex, VectorInsightIndex};
pub use languages::{Lang, detect_language, language_for};
pub use payload::{ChunkPayload, InsightPayload, PAYLOAD_SCHEMA_VERSION, Provenance};
pub use query::{
    BuiltFilter, DateRange, RetrievalFilter, Selectivity, SelectivityClass, build_filter,
};
pub use retriever::{
    CodeRetriever, RetrievalQuery, RetrievalResult, RetrievedChunk, RetrieverConfig,
};
pub use scoring::{CustomWeights, HybridScore, ScoreFactors, ScoringQuery, ScoringWeights};
