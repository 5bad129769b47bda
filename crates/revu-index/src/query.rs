//! Translation of declarative retrieval filters into backend-neutral
//! [`VectorFilter`] predicates, with conflict warnings and a selectivity
//! estimate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use revu_memory::{Condition, FieldValue, RangeBounds, VectorFilter};
use serde::{Deserialize, Serialize};

use crate::chunker::ChunkType;
use crate::error::{IndexError, Result};
use crate::languages::Lang;
use crate::payload::fields;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Which indexed chunks a query may match. Empty lists and `None` mean
/// "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalFilter {
    pub files: Vec<String>,
    pub exclude_files: Vec<String>,
    /// Glob patterns; a chunk must match at least one.
    pub file_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub languages: Vec<Lang>,
    pub exclude_languages: Vec<Lang>,
    pub chunk_types: Vec<ChunkType>,
    pub exclude_chunk_types: Vec<ChunkType>,
    pub commits: Vec<String>,
    pub authors: Vec<String>,
    pub date_range: Option<DateRange>,
    pub min_complexity: Option<u32>,
    pub max_complexity: Option<u32>,
    pub has_dependencies: Option<bool>,
    pub has_imports: Option<bool>,
    /// Exact matches against `metadata.<key>`.
    pub custom: BTreeMap<String, FieldValue>,
}

impl RetrievalFilter {
    #[must_use]
    pub fn in_file(path: impl Into<String>) -> Self {
        Self {
            files: vec![path.into()],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_language(lang: Lang) -> Self {
        Self {
            languages: vec![lang],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_commit(commit: impl Into<String>) -> Self {
        Self {
            commits: vec![commit.into()],
            ..Self::default()
        }
    }

    /// Everything below a directory prefix.
    #[must_use]
    pub fn in_directory(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            file_patterns: vec![format!("{prefix}/**")],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectivityClass {
    Few,
    Moderate,
    Many,
}

/// Diagnostic estimate of how narrow a filter is, 0 (everything) to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectivity {
    pub score: u8,
    pub class: SelectivityClass,
}

impl Selectivity {
    fn from_score(score: u8) -> Self {
        let class = match score {
            70.. => SelectivityClass::Few,
            40..70 => SelectivityClass::Moderate,
            _ => SelectivityClass::Many,
        };
        Self { score, class }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltFilter {
    pub filter: VectorFilter,
    pub applied_filters: Vec<String>,
    pub warnings: Vec<String>,
    pub selectivity: Selectivity,
}

/// Build the backend predicate for `filter`. `now` closes open date ranges
/// for the selectivity estimate.
///
/// # Errors
///
/// Returns [`IndexError::Validation`] for an invalid glob, inverted bounds,
/// or an empty custom key.
pub fn build_filter(filter: &RetrievalFilter, now: DateTime<Utc>) -> Result<BuiltFilter> {
    let mut out = VectorFilter::default();
    let mut applied = Vec::new();
    let mut scores: Vec<u8> = Vec::new();

    if !filter.files.is_empty() {
        out.must.push(any_of(fields::FILE_PATH, &filter.files));
        applied.push(format!("files: {}", filter.files.join(", ")));
        scores.push(match filter.files.len() {
            0..=3 => 90,
            4..=10 => 70,
            _ => 50,
        });
    }
    if !filter.exclude_files.is_empty() {
        out.must_not.push(any_of(fields::FILE_PATH, &filter.exclude_files));
        applied.push(format!("exclude files: {}", filter.exclude_files.join(", ")));
    }

    for pattern in filter.file_patterns.iter().chain(&filter.exclude_patterns) {
        glob::Pattern::new(pattern).map_err(|e| {
            IndexError::validation("file_patterns", format!("invalid glob `{pattern}`: {e}"))
        })?;
    }
    match filter.file_patterns.as_slice() {
        [] => {}
        [single] => out.must.push(Condition::pattern(fields::FILE_PATH, single)),
        many => out.should.extend(
            many.iter()
                .map(|p| Condition::pattern(fields::FILE_PATH, p)),
        ),
    }
    if !filter.file_patterns.is_empty() {
        applied.push(format!("file patterns: {}", filter.file_patterns.join(", ")));
        scores.push(40);
    }
    for pattern in &filter.exclude_patterns {
        out.must_not.push(Condition::pattern(fields::FILE_PATH, pattern));
    }
    if !filter.exclude_patterns.is_empty() {
        applied.push(format!("exclude patterns: {}", filter.exclude_patterns.join(", ")));
    }

    if !filter.languages.is_empty() {
        let ids: Vec<&str> = filter.languages.iter().map(|l| l.id()).collect();
        out.must.push(any_of(fields::LANGUAGE, &ids));
        applied.push(format!("languages: {}", ids.join(", ")));
        scores.push(30);
    }
    if !filter.exclude_languages.is_empty() {
        let ids: Vec<&str> = filter.exclude_languages.iter().map(|l| l.id()).collect();
        out.must_not.push(any_of(fields::LANGUAGE, &ids));
        applied.push(format!("exclude languages: {}", ids.join(", ")));
    }

    if !filter.chunk_types.is_empty() {
        let types: Vec<&str> = filter.chunk_types.iter().map(|t| t.as_str()).collect();
        out.must.push(any_of(fields::CHUNK_TYPE, &types));
        applied.push(format!("chunk types: {}", types.join(", ")));
    }
    if !filter.exclude_chunk_types.is_empty() {
        let types: Vec<&str> = filter
            .exclude_chunk_types
            .iter()
            .map(|t| t.as_str())
            .collect();
        out.must_not.push(any_of(fields::CHUNK_TYPE, &types));
        applied.push(format!("exclude chunk types: {}", types.join(", ")));
    }

    if !filter.commits.is_empty() {
        out.must.push(any_of(fields::COMMIT, &filter.commits));
        applied.push(format!("commits: {}", filter.commits.join(", ")));
        scores.push(80);
    }
    if !filter.authors.is_empty() {
        out.must.push(any_of(fields::AUTHOR, &filter.authors));
        applied.push(format!("authors: {}", filter.authors.join(", ")));
    }

    if let Some(range) = filter.date_range
        && (range.from.is_some() || range.to.is_some())
    {
        if let (Some(from), Some(to)) = (range.from, range.to)
            && from > to
        {
            return Err(IndexError::validation("date_range", "`from` is after `to`"));
        }
        #[allow(clippy::cast_precision_loss)]
        let bounds = RangeBounds::between(
            range.from.map(|t| t.timestamp() as f64),
            range.to.map(|t| t.timestamp() as f64),
        );
        out.must.push(Condition::range(fields::CREATED_AT, bounds));
        applied.push(format!(
            "date range: {} .. {}",
            range.from.map_or_else(|| "*".to_owned(), |t| t.to_rfc3339()),
            range.to.map_or_else(|| "*".to_owned(), |t| t.to_rfc3339()),
        ));
        scores.push(match range.from {
            Some(from) => match (range.to.unwrap_or(now) - from).num_days() {
                ..=7 => 60,
                8..=30 => 40,
                _ => 20,
            },
            None => 20,
        });
    }

    if filter.min_complexity.is_some() || filter.max_complexity.is_some() {
        if let (Some(min), Some(max)) = (filter.min_complexity, filter.max_complexity)
            && min > max
        {
            return Err(IndexError::validation(
                "complexity",
                format!("min_complexity {min} exceeds max_complexity {max}"),
            ));
        }
        let bounds = RangeBounds::between(
            filter.min_complexity.map(f64::from),
            filter.max_complexity.map(f64::from),
        );
        out.must.push(Condition::range(fields::COMPLEXITY, bounds));
        applied.push(format!(
            "complexity: {} .. {}",
            filter.min_complexity.map_or_else(|| "*".to_owned(), |v| v.to_string()),
            filter.max_complexity.map_or_else(|| "*".to_owned(), |v| v.to_string()),
        ));
    }

    presence(&mut out, &mut applied, fields::DEPENDENCIES, filter.has_dependencies);
    presence(&mut out, &mut applied, fields::IMPORTS, filter.has_imports);

    for (key, value) in &filter.custom {
        if key.trim().is_empty() {
            return Err(IndexError::validation("custom", "keys must not be empty"));
        }
        let field = format!("{}.{key}", fields::METADATA);
        out.must.push(Condition::matches_value(&field, value.clone()));
        applied.push(format!("{field} = {value}"));
    }

    let warnings = conflicts(&out);
    for warning in &warnings {
        tracing::warn!("filter conflict: {warning}");
    }
    let selectivity = Selectivity::from_score(scores.into_iter().max().unwrap_or(0));
    tracing::debug!(
        clauses = out.clause_count(),
        selectivity = selectivity.score,
        "built retrieval filter"
    );

    Ok(BuiltFilter {
        filter: out,
        applied_filters: applied,
        warnings,
        selectivity,
    })
}

fn any_of<S: AsRef<str>>(field: &str, values: &[S]) -> Condition {
    let values: Vec<&str> = values.iter().map(AsRef::<str>::as_ref).collect();
    match values.as_slice() {
        [single] => Condition::matches_value(field, *single),
        many => Condition::matches_any(field, many.iter().copied()),
    }
}

fn presence(out: &mut VectorFilter, applied: &mut Vec<String>, field: &str, flag: Option<bool>) {
    match flag {
        Some(true) => {
            out.must_not.push(Condition::is_empty(field));
            applied.push(format!("has {field}"));
        }
        Some(false) => {
            out.must.push(Condition::is_empty(field));
            applied.push(format!("no {field}"));
        }
        None => {}
    }
}

/// Equality values both required and excluded on the same field.
fn conflicts(filter: &VectorFilter) -> Vec<String> {
    let mut warnings = Vec::new();
    for required in &filter.must {
        let Some(wanted) = required.equality_values() else {
            continue;
        };
        for excluded in filter.must_not.iter().filter(|c| c.field() == required.field()) {
            let Some(banned) = excluded.equality_values() else {
                continue;
            };
            let clash: Vec<String> = wanted
                .iter()
                .filter(|v| banned.contains(v))
                .map(ToString::to_string)
                .collect();
            if clash.is_empty() {
                continue;
            }
            let outcome = if clash.len() == wanted.len() {
                "no chunk can match"
            } else {
                "excluded values win"
            };
            warnings.push(format!(
                "{} both required and excluded: {} ({outcome})",
                required.field(),
                clash.join(", ")
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    #[test]
    fn empty_filter_is_unconstrained() {
        let built = build_filter(&RetrievalFilter::default(), now()).unwrap();
        assert!(built.filter.is_empty());
        assert!(built.applied_filters.is_empty());
        assert_eq!(built.selectivity.class, SelectivityClass::Many);
    }

    #[test]
    fn inclusion_and_exclusion_lists() {
        let filter = RetrievalFilter {
            languages: vec![Lang::Rust, Lang::Go],
            exclude_chunk_types: vec![ChunkType::File],
            ..RetrievalFilter::default()
        };
        let built = build_filter(&filter, now()).unwrap();
        assert_eq!(
            built.filter.must,
            vec![Condition::matches_any(fields::LANGUAGE, ["rust", "go"])]
        );
        assert_eq!(
            built.filter.must_not,
            vec![Condition::matches_value(fields::CHUNK_TYPE, "file")]
        );
        assert_eq!(built.applied_filters.len(), 2);
    }

    #[test]
    fn several_patterns_become_alternatives() {
        let filter = RetrievalFilter {
            file_patterns: vec!["*.rs".into(), "src/**/*.go".into()],
            ..RetrievalFilter::default()
        };
        let built = build_filter(&filter, now()).unwrap();
        assert_eq!(built.filter.should.len(), 2);
        assert!(built.filter.must.is_empty());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let filter = RetrievalFilter {
            file_patterns: vec!["src/[".into()],
            ..RetrievalFilter::default()
        };
        let err = build_filter(&filter, now()).unwrap_err();
        assert!(matches!(err, IndexError::Validation { ref field, .. } if field == "file_patterns"));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let complexity = RetrievalFilter {
            min_complexity: Some(9),
            max_complexity: Some(3),
            ..RetrievalFilter::default()
        };
        assert!(build_filter(&complexity, now()).is_err());

        let dates = RetrievalFilter {
            date_range: Some(DateRange {
                from: Some(now()),
                to: Some(now() - TimeDelta::days(1)),
            }),
            ..RetrievalFilter::default()
        };
        assert!(build_filter(&dates, now()).is_err());
    }

    #[test]
    fn presence_flags_use_emptiness() {
        let filter = RetrievalFilter {
            has_dependencies: Some(true),
            has_imports: Some(false),
            ..RetrievalFilter::default()
        };
        let built = build_filter(&filter, now()).unwrap();
        assert_eq!(
            built.filter.must_not,
            vec![Condition::is_empty(fields::DEPENDENCIES)]
        );
        assert_eq!(built.filter.must, vec![Condition::is_empty(fields::IMPORTS)]);
    }

    #[test]
    fn custom_fields_are_namespaced() {
        let mut filter = RetrievalFilter::default();
        filter.custom.insert("team".into(), "payments".into());
        let built = build_filter(&filter, now()).unwrap();
        assert_eq!(
            built.filter.must,
            vec![Condition::matches_value("metadata.team", "payments")]
        );
    }

    #[test]
    fn conflicts_are_flagged_not_resolved() {
        let filter = RetrievalFilter {
            files: vec!["a.rs".into()],
            exclude_files: vec!["a.rs".into()],
            ..RetrievalFilter::default()
        };
        let built = build_filter(&filter, now()).unwrap();
        assert_eq!(built.warnings.len(), 1);
        assert!(built.warnings[0].contains("no chunk can match"));
        assert_eq!(built.filter.must.len(), 1);
        assert_eq!(built.filter.must_not.len(), 1);
    }

    #[test]
    fn selectivity_takes_the_narrowest_clause() {
        let filter = RetrievalFilter {
            languages: vec![Lang::Rust],
            commits: vec!["abc".into()],
            ..RetrievalFilter::default()
        };
        let built = build_filter(&filter, now()).unwrap();
        assert_eq!(built.selectivity.score, 80);
        assert_eq!(built.selectivity.class, SelectivityClass::Few);

        let languages = build_filter(&RetrievalFilter::for_language(Lang::Go), now()).unwrap();
        assert_eq!(languages.selectivity.class, SelectivityClass::Many);
    }

    #[test]
    fn date_selectivity_by_span() {
        let week = RetrievalFilter {
            date_range: Some(DateRange {
                from: Some(now() - TimeDelta::days(5)),
                to: None,
            }),
            ..RetrievalFilter::default()
        };
        let built = build_filter(&week, now()).unwrap();
        assert_eq!(built.selectivity.score, 60);
        assert_eq!(built.selectivity.class, SelectivityClass::Moderate);
    }

    #[test]
    fn directory_filter_matches_nested_paths() {
        let built = build_filter(&RetrievalFilter::in_directory("src/auth/"), now()).unwrap();
        let payload: revu_memory::Payload =
            serde_json::from_value(serde_json::json!({"file_path": "src/auth/jwt/verify.rs"}))
                .unwrap();
        assert!(built.filter.matches(&payload));
        let other: revu_memory::Payload =
            serde_json::from_value(serde_json::json!({"file_path": "src/db/pool.rs"})).unwrap();
        assert!(!built.filter.matches(&other));
    }
}
