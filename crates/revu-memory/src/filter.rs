//! Backend-neutral payload predicates.
//!
//! A [`VectorFilter`] is three clause groups: every `must` clause has to hold,
//! no `must_not` clause may hold, and when `should` is non-empty at least one
//! of its clauses has to hold. Array-valued payload fields match when any
//! element matches, mirroring Qdrant semantics.

use serde::{Deserialize, Serialize};

use crate::vector_store::Payload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Bool(bool),
    Text(String),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Inclusive/exclusive numeric bounds; unset sides are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub gt: Option<f64>,
    pub gte: Option<f64>,
    pub lt: Option<f64>,
    pub lte: Option<f64>,
}

impl RangeBounds {
    #[must_use]
    pub fn between(gte: Option<f64>, lte: Option<f64>) -> Self {
        Self {
            gte,
            lte,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn contains(&self, v: f64) -> bool {
        self.gt.is_none_or(|b| v > b)
            && self.gte.is_none_or(|b| v >= b)
            && self.lt.is_none_or(|b| v < b)
            && self.lte.is_none_or(|b| v <= b)
    }

    /// Whether no value can satisfy the bounds.
    #[must_use]
    pub fn is_unsatisfiable(&self) -> bool {
        let low = self.gte.or(self.gt);
        let high = self.lte.or(self.lt);
        match (low, high) {
            (Some(l), Some(h)) => l > h || (l == h && (self.gt.is_some() || self.lt.is_some())),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Field equals the value.
    Match { field: String, value: FieldValue },
    /// Field equals any of the values.
    MatchAny {
        field: String,
        values: Vec<FieldValue>,
    },
    /// Field is a path matching a glob pattern. Patterns without `/` match
    /// the final path component only.
    Pattern { field: String, glob: String },
    /// Numeric field lies within the bounds.
    Range { field: String, bounds: RangeBounds },
    /// Field is missing, null, or an empty array/string.
    IsEmpty { field: String },
}

impl Condition {
    #[must_use]
    pub fn matches_value(field: &str, value: impl Into<FieldValue>) -> Self {
        Self::Match {
            field: field.to_owned(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn matches_any<V: Into<FieldValue>>(
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::MatchAny {
            field: field.to_owned(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn pattern(field: &str, glob: &str) -> Self {
        Self::Pattern {
            field: field.to_owned(),
            glob: glob.to_owned(),
        }
    }

    #[must_use]
    pub fn range(field: &str, bounds: RangeBounds) -> Self {
        Self::Range {
            field: field.to_owned(),
            bounds,
        }
    }

    #[must_use]
    pub fn is_empty(field: &str) -> Self {
        Self::IsEmpty {
            field: field.to_owned(),
        }
    }

    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Match { field, .. }
            | Self::MatchAny { field, .. }
            | Self::Pattern { field, .. }
            | Self::Range { field, .. }
            | Self::IsEmpty { field } => field,
        }
    }

    /// Values this clause matches by equality, if it is an equality clause.
    #[must_use]
    pub fn equality_values(&self) -> Option<Vec<&FieldValue>> {
        match self {
            Self::Match { value, .. } => Some(vec![value]),
            Self::MatchAny { values, .. } => Some(values.iter().collect()),
            _ => None,
        }
    }

    /// Evaluate the clause against a payload.
    #[must_use]
    pub fn evaluate(&self, payload: &Payload) -> bool {
        let value = lookup(payload, self.field());
        match self {
            Self::Match { value: expected, .. } => {
                value.is_some_and(|v| any_element(v, |e| value_eq(e, expected)))
            }
            Self::MatchAny { values, .. } => value.is_some_and(|v| {
                any_element(v, |e| values.iter().any(|expected| value_eq(e, expected)))
            }),
            Self::Pattern { glob, .. } => value.is_some_and(|v| {
                any_element(v, |e| e.as_str().is_some_and(|s| glob_matches(glob, s)))
            }),
            Self::Range { bounds, .. } => {
                value.is_some_and(|v| any_element(v, |e| e.as_f64().is_some_and(|n| bounds.contains(n))))
            }
            Self::IsEmpty { .. } => match value {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::Array(a)) => a.is_empty(),
                Some(serde_json::Value::String(s)) => s.is_empty(),
                Some(_) => false,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorFilter {
    #[serde(default)]
    pub must: Vec<Condition>,
    #[serde(default)]
    pub must_not: Vec<Condition>,
    #[serde(default)]
    pub should: Vec<Condition>,
}

impl VectorFilter {
    #[must_use]
    pub fn must(conditions: Vec<Condition>) -> Self {
        Self {
            must: conditions,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty() && self.should.is_empty()
    }

    #[must_use]
    pub fn clause_count(&self) -> usize {
        self.must.len() + self.must_not.len() + self.should.len()
    }

    /// Evaluate every clause group against a payload.
    #[must_use]
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|c| c.evaluate(payload))
            && !self.must_not.iter().any(|c| c.evaluate(payload))
            && (self.should.is_empty() || self.should.iter().any(|c| c.evaluate(payload)))
    }

    /// Merge another filter's clauses into this one.
    pub fn extend(&mut self, other: VectorFilter) {
        self.must.extend(other.must);
        self.must_not.extend(other.must_not);
        self.should.extend(other.should);
    }
}

/// Resolve a field, descending into nested objects for dotted keys.
fn lookup<'a>(payload: &'a Payload, field: &str) -> Option<&'a serde_json::Value> {
    if let Some(v) = payload.get(field) {
        return Some(v);
    }
    let mut parts = field.split('.');
    let mut current = payload.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn any_element(value: &serde_json::Value, pred: impl Fn(&serde_json::Value) -> bool) -> bool {
    match value {
        serde_json::Value::Array(items) => items.iter().any(pred),
        other => pred(other),
    }
}

fn value_eq(actual: &serde_json::Value, expected: &FieldValue) -> bool {
    match expected {
        FieldValue::Integer(i) => actual.as_i64() == Some(*i),
        FieldValue::Bool(b) => actual.as_bool() == Some(*b),
        FieldValue::Text(s) => actual.as_str() == Some(s.as_str()),
    }
}

/// Match a path against a glob. Patterns without a `/` are applied to the
/// file name; patterns with one are applied to the whole path, with `*`
/// confined to a single component and `**` spanning directories.
#[must_use]
pub fn glob_matches(glob: &str, path: &str) -> bool {
    let Ok(pattern) = glob::Pattern::new(glob) else {
        return false;
    };
    if glob.contains('/') {
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        pattern.matches_with(path, options)
    } else {
        let name = path.rsplit('/').next().unwrap_or(path);
        pattern.matches(name)
    }
}

/// Longest run of literal characters in a glob, for backends that can only
/// approximate patterns with substring matching.
#[must_use]
pub fn glob_literal_fragment(glob: &str) -> String {
    glob.split(['*', '?', '[', ']', '{', '}'])
        .map(|s| s.trim_matches('/'))
        .max_by_key(|s| s.len())
        .unwrap_or_default()
        .to_owned()
}
