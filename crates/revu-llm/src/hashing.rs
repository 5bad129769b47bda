//! Deterministic local embedder based on feature hashing.
//!
//! Splits text into identifier-aware tokens (`camelCase` and `snake_case` are
//! broken into their parts), hashes each token into a fixed number of buckets
//! with blake3, and L2-normalizes the result. Useful offline and in tests where
//! related snippets must land close to each other without a model server.

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

const DEFAULT_DIMENSIONS: usize = 256;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            let index = (bucket % self.dimensions as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    fn model(&self) -> &'static str {
        "feature-hash-v1"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.embed_sync(text))
    }
}

/// Lowercased word tokens with identifier parts split out.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }
        let parts = split_identifier(word);
        if parts.len() > 1 {
            tokens.push(word.to_lowercase());
        }
        tokens.extend(parts);
    }
    tokens
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for segment in word.split('_').filter(|s| !s.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in segment.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn tokenize_splits_identifiers() {
        let tokens = tokenize("parseHttpRequest(raw_input)");
        assert!(tokens.contains(&"parse".to_string()));
        assert!(tokens.contains(&"http".to_string()));
        assert!(tokens.contains(&"request".to_string()));
        assert!(tokens.contains(&"raw".to_string()));
        assert!(tokens.contains(&"input".to_string()));
        assert!(tokens.contains(&"parsehttprequest".to_string()));
    }

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_sync("fn load_config(path: &Path)");
        let b = embedder.embed_sync("fn load_config(path: &Path)");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_sync("load configuration file");
        let related = embedder.embed_sync("fn load_configuration_file(path) { read file }");
        let unrelated = embedder.embed_sync("render button widget color theme");
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed_sync("").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn provider_embed_matches_sync() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed("hello world").await.unwrap();
        assert_eq!(v, embedder.embed_sync("hello world"));
        assert_eq!(v.len(), 32);
    }
}
