use std::path::PathBuf;

use revu_index::ScoringWeights;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub chunker: ChunkerSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub prompt: PromptSection,
    #[serde(default)]
    pub indexer: IndexerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

fn default_chunk_size() -> usize {
    60
}

fn default_overlap_lines() -> usize {
    5
}

fn default_min_chunk_lines() -> usize {
    2
}

fn default_ast_max_depth() -> usize {
    6
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChunkerSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    #[serde(default = "default_min_chunk_lines")]
    pub min_chunk_lines: usize,
    #[serde(default = "default_ast_max_depth")]
    pub ast_max_depth: usize,
    #[serde(default = "default_true")]
    pub respect_boundaries: bool,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

impl Default for ChunkerSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_lines: default_overlap_lines(),
            min_chunk_lines: default_min_chunk_lines(),
            ast_max_depth: default_ast_max_depth(),
            respect_boundaries: true,
            enable_fallback: true,
        }
    }
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_max_size_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_max_size_bytes")]
    pub max_size_bytes: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
    #[serde(default)]
    pub persist_on_mutation: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            max_size_bytes: default_cache_max_size_bytes(),
            ttl_secs: default_cache_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            persist_path: None,
            persist_on_mutation: false,
        }
    }
}

fn default_top_k() -> usize {
    10
}

fn default_min_score() -> f32 {
    0.25
}

fn default_collection() -> String {
    "revu_code_chunks".into()
}

fn default_insights_collection() -> String {
    "revu_review_insights".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetrievalSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_insights_collection")]
    pub insights_collection: String,
    #[serde(default = "default_true")]
    pub include_insights: bool,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            collection: default_collection(),
            insights_collection: default_insights_collection(),
            include_insights: true,
        }
    }
}

fn default_token_budget() -> usize {
    8000
}

fn default_preamble_fraction() -> f32 {
    0.10
}

fn default_context_fraction() -> f32 {
    0.60
}

fn default_diffs_fraction() -> f32 {
    0.20
}

fn default_insights_fraction() -> f32 {
    0.10
}

fn default_instructions_fraction() -> f32 {
    0.10
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PromptSection {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_preamble_fraction")]
    pub preamble: f32,
    #[serde(default = "default_context_fraction")]
    pub context: f32,
    #[serde(default = "default_diffs_fraction")]
    pub diffs: f32,
    #[serde(default = "default_insights_fraction")]
    pub insights: f32,
    #[serde(default = "default_instructions_fraction")]
    pub instructions: f32,
}

impl Default for PromptSection {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            preamble: default_preamble_fraction(),
            context: default_context_fraction(),
            diffs: default_diffs_fraction(),
            insights: default_insights_fraction(),
            instructions: default_instructions_fraction(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IndexerSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub skip_errors: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexerSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            skip_errors: true,
            max_file_bytes: default_max_file_bytes(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreSection {
    /// Qdrant gRPC endpoint. Points stay in process memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant_url: Option<String>,
    /// Fixed embedding dimension; probed from the embedder when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_size: Option<u64>,
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
