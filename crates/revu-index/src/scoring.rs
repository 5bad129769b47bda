//! Hybrid ranking: semantic similarity blended with heuristic signals.
//!
//! `total = Σ factor × weight`, clamped to `[0, 1]`. Weights are taken as
//! given; callers overriding them are responsible for keeping the sum at 1.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker::{ChunkType, CodeChunk};
use crate::error::{IndexError, Result};
use crate::languages::Lang;

const UNKNOWN_RECENCY: f32 = 0.5;
const DEFAULT_IMPORTANCE: f32 = 0.5;

const HIGH_IMPORTANCE: &[&str] = &[
    "service", "services", "component", "components", "controller", "controllers", "handler",
    "handlers", "api", "core", "domain", "model", "models", "auth", "security", "server",
];
const LOW_IMPORTANCE: &[&str] = &[
    "test", "tests", "spec", "specs", "mock", "mocks", "fixture", "fixtures", "config",
    "example", "examples", "vendor", "generated", "docs", "bench", "benches",
];
const ENTRY_POINTS: &[&str] = &["main", "lib", "index", "mod", "app"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub semantic: f32,
    pub recency: f32,
    pub file_importance: f32,
    pub code_quality: f32,
    pub textual_relevance: f32,
    /// Per-30-days multiplier of the recency factor.
    pub recency_decay: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            recency: 0.1,
            file_importance: 0.1,
            code_quality: 0.1,
            textual_relevance: 0.2,
            recency_decay: 0.95,
        }
    }
}

impl ScoringWeights {
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] for negative or non-finite weights,
    /// or a decay outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("semantic", self.semantic),
            ("recency", self.recency),
            ("file_importance", self.file_importance),
            ("code_quality", self.code_quality),
            ("textual_relevance", self.textual_relevance),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(IndexError::validation(
                    format!("weights.{name}"),
                    format!("must be a non-negative number, got {w}"),
                ));
            }
        }
        if !(self.recency_decay > 0.0 && self.recency_decay <= 1.0) {
            return Err(IndexError::validation(
                "weights.recency_decay",
                "must be within (0, 1]",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn sum(&self) -> f32 {
        self.semantic + self.recency + self.file_importance + self.code_quality + self.textual_relevance
    }
}

/// Per-query factors, weighted 0 unless the caller opts in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomWeights {
    pub query_term_match: f32,
    pub language_match: f32,
    pub file_match: f32,
}

impl CustomWeights {
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] for negative or non-finite weights.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("query_term_match", self.query_term_match),
            ("language_match", self.language_match),
            ("file_match", self.file_match),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(IndexError::validation(
                    format!("custom_weights.{name}"),
                    format!("must be a non-negative number, got {w}"),
                ));
            }
        }
        Ok(())
    }
}

/// Query-side inputs to scoring.
#[derive(Debug, Clone)]
pub struct ScoringQuery {
    /// Lowercased search terms.
    pub terms: Vec<String>,
    pub languages: Vec<Lang>,
    /// Paths or directory prefixes of interest.
    pub files: Vec<String>,
    pub weights: ScoringWeights,
    pub custom: CustomWeights,
    pub now: DateTime<Utc>,
}

impl ScoringQuery {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            terms: Vec::new(),
            languages: Vec::new(),
            files: Vec::new(),
            weights: ScoringWeights::default(),
            custom: CustomWeights::default(),
            now,
        }
    }

    #[must_use]
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        self.terms = terms
            .into_iter()
            .map(|t| t.as_ref().to_lowercase())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub semantic: f32,
    pub recency: f32,
    pub file_importance: f32,
    pub code_quality: f32,
    pub textual_relevance: f32,
    pub query_term_match: f32,
    pub language_match: f32,
    pub file_match: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridScore {
    pub total: f32,
    pub factors: ScoreFactors,
    pub weights: ScoringWeights,
    /// Weighted contribution of each non-zero term.
    pub breakdown: BTreeMap<String, f32>,
}

/// Score one chunk. `semantic` is the similarity reported by the vector
/// search; `created_at` comes from the chunk's provenance.
#[must_use]
pub fn score(
    chunk: &CodeChunk,
    semantic: f32,
    created_at: Option<DateTime<Utc>>,
    query: &ScoringQuery,
) -> HybridScore {
    let weights = query.weights;
    let factors = ScoreFactors {
        semantic: if semantic.is_finite() {
            semantic.clamp(0.0, 1.0)
        } else {
            0.0
        },
        recency: recency(created_at, query.now, weights.recency_decay),
        file_importance: file_importance(&chunk.file_path),
        code_quality: code_quality(chunk),
        textual_relevance: textual_relevance(chunk, &query.terms),
        query_term_match: term_match_ratio(chunk, &query.terms),
        language_match: if query.languages.contains(&chunk.language) {
            1.0
        } else {
            0.0
        },
        file_match: if query.files.iter().any(|f| path_matches(&chunk.file_path, f)) {
            1.0
        } else {
            0.0
        },
    };

    let terms = [
        ("semantic", factors.semantic, weights.semantic),
        ("recency", factors.recency, weights.recency),
        ("file_importance", factors.file_importance, weights.file_importance),
        ("code_quality", factors.code_quality, weights.code_quality),
        ("textual_relevance", factors.textual_relevance, weights.textual_relevance),
        ("query_term_match", factors.query_term_match, query.custom.query_term_match),
        ("language_match", factors.language_match, query.custom.language_match),
        ("file_match", factors.file_match, query.custom.file_match),
    ];

    let mut breakdown = BTreeMap::new();
    let mut total = 0.0_f32;
    for (name, factor, weight) in terms {
        let contribution = factor * weight;
        if contribution.abs() > f32::EPSILON {
            breakdown.insert(name.to_owned(), contribution);
        }
        total += contribution;
    }

    HybridScore {
        total: total.clamp(0.0, 1.0),
        factors,
        weights,
        breakdown,
    }
}

/// Sort descending by score. Equal scores keep their input order.
pub fn rank_by_score<T>(items: &mut [T], score: impl Fn(&T) -> f32) {
    items.sort_by(|a, b| score(b).total_cmp(&score(a)));
}

/// `decay ^ (days / 30)`, or a neutral 0.5 when the age is unknown.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn recency(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>, decay: f32) -> f32 {
    let Some(created) = created_at else {
        return UNKNOWN_RECENCY;
    };
    let days = ((now - created).num_seconds().max(0) as f32) / 86_400.0;
    decay.powf(days / 30.0).clamp(0.0, 1.0)
}

/// Path keyword heuristic: core code above the default, tests and config below.
#[must_use]
pub fn file_importance(path: &str) -> f32 {
    let lower = path.to_lowercase();
    let parts: Vec<&str> = lower
        .split(['/', '\\', '_', '-', '.'])
        .filter(|p| !p.is_empty())
        .collect();

    if parts.iter().any(|p| LOW_IMPORTANCE.contains(p)) {
        return 0.3;
    }
    if parts.iter().any(|p| HIGH_IMPORTANCE.contains(p)) {
        return 0.8;
    }
    let stem = lower
        .rsplit('/')
        .next()
        .and_then(|name| name.split('.').next())
        .unwrap_or_default();
    if ENTRY_POINTS.contains(&stem) {
        return 0.7;
    }
    DEFAULT_IMPORTANCE
}

/// Bounded complexity, declared dependencies and a chunk-type bonus.
#[must_use]
pub fn code_quality(chunk: &CodeChunk) -> f32 {
    let mut quality: f32 = 0.5;
    match chunk.complexity_score {
        1..=10 => quality += 0.2,
        21.. => quality -= 0.2,
        _ => {}
    }
    if !chunk.dependencies.is_empty() {
        quality += 0.1;
    }
    quality += match chunk.chunk_type {
        ChunkType::Class => 0.2,
        ChunkType::Function => 0.15,
        ChunkType::Method => 0.1,
        ChunkType::Module => 0.05,
        _ => 0.0,
    };
    quality.clamp(0.0, 1.0)
}

/// `path` is `target` itself or lies under the directory `target`.
fn path_matches(path: &str, target: &str) -> bool {
    let dir = target.trim_end_matches('/');
    path == target
        || (!dir.is_empty()
            && path
                .strip_prefix(dir)
                .is_some_and(|rest| rest.starts_with('/')))
}

/// Fraction of terms found in the content, plus bonuses for a file name
/// match and for declaration chunks.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn textual_relevance(chunk: &CodeChunk, terms: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let content = chunk.content.to_lowercase();
    let found = terms.iter().filter(|t| content.contains(t.as_str())).count();
    let mut relevance = 0.6 * found as f32 / terms.len() as f32;

    let file_name = chunk
        .file_path
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if terms.iter().any(|t| file_name.contains(t.as_str())) {
        relevance += 0.2;
    }
    if matches!(
        chunk.chunk_type,
        ChunkType::Function | ChunkType::Class | ChunkType::Method
    ) {
        relevance += 0.1;
    }
    relevance.min(1.0)
}

#[allow(clippy::cast_precision_loss)]
fn term_match_ratio(chunk: &CodeChunk, terms: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let content = chunk.content.to_lowercase();
    let name = chunk.name.as_deref().unwrap_or_default().to_lowercase();
    let found = terms
        .iter()
        .filter(|t| content.contains(t.as_str()) || name.contains(t.as_str()))
        .count();
    found as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::chunker::chunk_id;

    fn chunk(path: &str, chunk_type: ChunkType) -> CodeChunk {
        CodeChunk {
            id: chunk_id(path, 1, 10),
            content: "fn refresh_token(session: &Session) { validate(session) }".into(),
            language: Lang::Rust,
            start_line: 1,
            end_line: 10,
            chunk_type,
            complexity_score: 3,
            dependencies: vec!["validate".into()],
            imports: vec![],
            file_path: path.into(),
            name: Some("refresh_token".into()),
            content_hash: String::new(),
            embedding: None,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    #[test]
    fn file_match_stops_at_path_boundaries() {
        assert!(path_matches("src/a.rs", "src/a.rs"));
        assert!(path_matches("src/a/mod.rs", "src/a"));
        assert!(path_matches("src/a/mod.rs", "src/a/"));
        assert!(!path_matches("src/abc.rs", "src/a"));
        assert!(!path_matches("src/abc.rs", "src/a/"));

        let c = chunk("src/abc.rs", ChunkType::Function);
        let mut query = ScoringQuery::new(now());
        query.files = vec!["src/a".into()];
        assert!(score(&c, 0.5, None, &query).factors.file_match.abs() < f32::EPSILON);
        query.files = vec!["src".into()];
        assert!((score(&c, 0.5, None, &query).factors.file_match - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn repeated_terms_are_kept_once_in_first_seen_order() {
        let query = ScoringQuery::new(now()).with_terms(["Token", "session", "token", "", "SESSION"]);
        assert_eq!(query.terms, vec!["token".to_string(), "session".to_string()]);
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((ScoringWeights::default().sum() - 1.0).abs() < 1e-6);
        assert!(ScoringWeights::default().validate().is_ok());
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let negative = ScoringWeights {
            recency: -0.1,
            ..ScoringWeights::default()
        };
        assert!(negative.validate().is_err());
        let nan = ScoringWeights {
            semantic: f32::NAN,
            ..ScoringWeights::default()
        };
        assert!(nan.validate().is_err());
        let decay = ScoringWeights {
            recency_decay: 1.5,
            ..ScoringWeights::default()
        };
        assert!(decay.validate().is_err());
    }

    #[test]
    fn higher_semantic_ranks_first() {
        let query = ScoringQuery::new(now());
        let c = chunk("src/auth/session.rs", ChunkType::Function);
        let mut scored = vec![
            ("low", score(&c, 0.5, None, &query).total),
            ("high", score(&c, 0.9, None, &query).total),
        ];
        rank_by_score(&mut scored, |s| s.1);
        assert_eq!(scored[0].0, "high");
    }

    #[test]
    fn ties_keep_input_order() {
        let mut items = vec![("a", 0.4), ("b", 0.7), ("c", 0.4)];
        rank_by_score(&mut items, |s| s.1);
        assert_eq!(items.iter().map(|i| i.0).collect::<Vec<_>>(), ["b", "a", "c"]);
    }

    #[test]
    fn total_is_weighted_sum() {
        let query = ScoringQuery::new(now()).with_terms(["refresh_token"]);
        let c = chunk("src/auth/session.rs", ChunkType::Function);
        let s = score(&c, 0.8, Some(now()), &query);
        let w = s.weights;
        let f = s.factors;
        let expected = f.semantic * w.semantic
            + f.recency * w.recency
            + f.file_importance * w.file_importance
            + f.code_quality * w.code_quality
            + f.textual_relevance * w.textual_relevance;
        assert!((s.total - expected).abs() < 1e-6);
        assert!((s.breakdown["semantic"] - 0.4).abs() < 1e-6);
        assert!(!s.breakdown.contains_key("language_match"));
    }

    #[test]
    fn total_is_clamped() {
        let mut query = ScoringQuery::new(now());
        query.weights = ScoringWeights {
            semantic: 5.0,
            ..ScoringWeights::default()
        };
        let s = score(&chunk("a.rs", ChunkType::Block), 1.0, None, &query);
        assert!((s.total - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn recency_decays_per_thirty_days() {
        assert!((recency(None, now(), 0.95) - 0.5).abs() < f32::EPSILON);
        assert!((recency(Some(now()), now(), 0.95) - 1.0).abs() < 1e-6);
        let month = recency(Some(now() - TimeDelta::days(30)), now(), 0.95);
        assert!((month - 0.95).abs() < 1e-4);
        let future = recency(Some(now() + TimeDelta::days(3)), now(), 0.95);
        assert!((future - 1.0).abs() < 1e-6);
    }

    #[test]
    fn file_importance_keywords() {
        assert!(file_importance("src/services/billing.rs") > DEFAULT_IMPORTANCE);
        assert!(file_importance("tests/services/billing.rs") < DEFAULT_IMPORTANCE);
        assert!(file_importance("config/app_config.toml") < DEFAULT_IMPORTANCE);
        assert!((file_importance("src/lib.rs") - 0.7).abs() < f32::EPSILON);
        assert!((file_importance("src/util/strings.rs") - DEFAULT_IMPORTANCE).abs() < f32::EPSILON);
    }

    #[test]
    fn code_quality_prefers_classes() {
        let class = code_quality(&chunk("a.rs", ChunkType::Class));
        let function = code_quality(&chunk("a.rs", ChunkType::Function));
        let method = code_quality(&chunk("a.rs", ChunkType::Method));
        let block = code_quality(&chunk("a.rs", ChunkType::Block));
        assert!(class >= function && function > method && method > block);

        let mut tangled = chunk("a.rs", ChunkType::Block);
        tangled.complexity_score = 40;
        tangled.dependencies.clear();
        assert!((code_quality(&tangled) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn textual_relevance_components() {
        let c = chunk("src/auth/session.rs", ChunkType::Function);
        let terms = vec!["session".to_string(), "missing".to_string()];
        // half the terms, file name match, declaration bonus
        assert!((textual_relevance(&c, &terms) - 0.6).abs() < 1e-6);
        assert!(textual_relevance(&c, &[]).abs() < f32::EPSILON);
    }

    #[test]
    fn custom_factors_default_to_zero_weight() {
        let mut query = ScoringQuery::new(now()).with_terms(["refresh"]);
        query.languages = vec![Lang::Rust];
        let c = chunk("src/a.rs", ChunkType::Function);
        let base = score(&c, 0.5, None, &query);
        assert!((base.factors.language_match - 1.0).abs() < f32::EPSILON);

        query.custom.language_match = 0.1;
        let boosted = score(&c, 0.5, None, &query);
        assert!((boosted.total - base.total - 0.1).abs() < 1e-6);
    }
}
