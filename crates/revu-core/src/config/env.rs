use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REVU_QDRANT_URL") {
            self.store.qdrant_url = Some(v).filter(|url| !url.is_empty());
        }
        if let Ok(v) = std::env::var("REVU_CHUNK_SIZE") {
            match v.parse::<usize>() {
                Ok(size) => self.chunker.chunk_size = size,
                Err(_) => tracing::warn!("ignoring invalid REVU_CHUNK_SIZE value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("REVU_CHUNK_OVERLAP")
            && let Ok(overlap) = v.parse::<usize>()
        {
            self.chunker.overlap_lines = overlap;
        }
        if let Ok(v) = std::env::var("REVU_CACHE_MAX_ENTRIES")
            && let Ok(n) = v.parse::<usize>()
        {
            self.cache.max_entries = n;
        }
        if let Ok(v) = std::env::var("REVU_CACHE_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.cache.ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("REVU_TOKEN_BUDGET") {
            match v.parse::<usize>() {
                Ok(budget) => self.prompt.token_budget = budget,
                Err(_) => tracing::warn!("ignoring invalid REVU_TOKEN_BUDGET value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("REVU_TOP_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.top_k = k;
        }
        if let Ok(v) = std::env::var("REVU_MIN_SCORE")
            && let Ok(score) = v.parse::<f32>()
        {
            self.retrieval.min_score = score;
        }
        if let Ok(v) = std::env::var("REVU_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.indexer.batch_size = n;
        }
        if let Ok(v) = std::env::var("REVU_LOG_LEVEL") {
            self.logging.level = v;
        }
    }
}
