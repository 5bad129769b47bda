mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use revu_index::{CacheConfig, ChunkerConfig, IndexerConfig, RetrieverConfig};
use revu_memory::RetryPolicy;

use crate::prompt::{BudgetFractions, PromptOptions};

impl Config {
    /// Load configuration from a TOML file with `REVU_*` env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting values fail validation.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check every section by building its runtime options.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value with the section it belongs to.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.chunker_config()
            .validate()
            .context("invalid [chunker] section")?;
        self.cache_config()
            .validate()
            .context("invalid [cache] section")?;
        self.scoring.validate().context("invalid [scoring] section")?;
        self.prompt_options()
            .validate()
            .context("invalid [prompt] section")?;
        self.indexer_config()
            .validate()
            .context("invalid [indexer] section")?;
        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            anyhow::bail!(
                "invalid [retrieval] section: min_score must be within [0, 1], got {}",
                self.retrieval.min_score
            );
        }
        if self
            .store
            .qdrant_url
            .as_deref()
            .is_some_and(|url| !url.starts_with("http://") && !url.starts_with("https://"))
        {
            anyhow::bail!("invalid [store] section: qdrant_url must be an http(s) URL");
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("invalid [retrieval] section: top_k must be at least 1");
        }
        Ok(())
    }

    #[must_use]
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_size: self.chunker.chunk_size,
            overlap_lines: self.chunker.overlap_lines,
            min_chunk_lines: self.chunker.min_chunk_lines,
            ast_max_depth: self.chunker.ast_max_depth,
            respect_boundaries: self.chunker.respect_boundaries,
            enable_fallback: self.chunker.enable_fallback,
        }
    }

    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache.max_entries,
            max_size_bytes: self.cache.max_size_bytes,
            ttl: Duration::from_secs(self.cache.ttl_secs),
            cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
            persist_path: self.cache.persist_path.clone(),
            persist_on_mutation: self.cache.persist_on_mutation,
        }
    }

    #[must_use]
    pub fn prompt_options(&self) -> PromptOptions {
        PromptOptions {
            token_budget: self.prompt.token_budget,
            fractions: BudgetFractions {
                preamble: self.prompt.preamble,
                context: self.prompt.context,
                diffs: self.prompt.diffs,
                insights: self.prompt.insights,
                instructions: self.prompt.instructions,
            },
            ..PromptOptions::default()
        }
    }

    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            chunker: self.chunker_config(),
            batch_size: self.indexer.batch_size,
            retry: RetryPolicy::new(self.indexer.max_retries),
            skip_errors: self.indexer.skip_errors,
            max_file_bytes: self.indexer.max_file_bytes,
            timeout: Duration::from_secs(self.indexer.timeout_secs),
            collection: self.retrieval.collection.clone(),
            vector_size: self.store.vector_size,
        }
    }

    #[must_use]
    pub fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            collection: self.retrieval.collection.clone(),
            top_k: self.retrieval.top_k,
            min_score: self.retrieval.min_score,
            include_insights: self.retrieval.include_insights,
            weights: self.scoring,
            timeout: Duration::from_secs(self.indexer.timeout_secs),
        }
    }
}
