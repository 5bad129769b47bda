//! Prior-review insights attached to retrieved chunks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use revu_memory::{Condition, VectorFilter, VectorPoint, VectorStore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::payload::{InsightPayload, fields, insight_collection_schema};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const INSIGHT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x3d9c_42a1_07be_5e6f_8a10_bb2e_91c4_f057);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finding from an earlier review, anchored to a file line or line range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub end_line: Option<usize>,
    pub category: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl Insight {
    /// Whether the insight's lines intersect `start..=end`.
    #[must_use]
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        let last = self.end_line.unwrap_or(self.line).max(self.line);
        self.line <= end && last >= start
    }

    fn point_id(&self) -> String {
        Uuid::new_v5(
            &INSIGHT_ID_NAMESPACE,
            format!("{}:{}:{}", self.file, self.line, self.summary).as_bytes(),
        )
        .to_string()
    }
}

/// Source of prior-review insights, queried by file.
pub trait InsightIndex: Send + Sync {
    /// Insights recorded for any of `files`.
    fn search<'a>(&'a self, files: &'a [String]) -> BoxFuture<'a, Result<Vec<Insight>>>;
}

/// Fixed in-memory insight list.
#[derive(Debug, Clone, Default)]
pub struct StaticInsightIndex {
    insights: Vec<Insight>,
}

impl StaticInsightIndex {
    #[must_use]
    pub fn new(insights: Vec<Insight>) -> Self {
        Self { insights }
    }
}

impl InsightIndex for StaticInsightIndex {
    fn search<'a>(&'a self, files: &'a [String]) -> BoxFuture<'a, Result<Vec<Insight>>> {
        Box::pin(async move {
            Ok(self
                .insights
                .iter()
                .filter(|i| files.contains(&i.file))
                .cloned()
                .collect())
        })
    }
}

/// Insights stored as points in a vector-store collection.
pub struct VectorInsightIndex {
    store: Arc<dyn VectorStore>,
    collection: String,
    limit: usize,
}

impl VectorInsightIndex {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            limit: 256,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Store insights with their embeddings, creating the collection on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be created or the upsert fails.
    pub async fn record(&self, insights: &[(Insight, Vec<f32>)]) -> Result<()> {
        let Some((_, first)) = insights.first() else {
            return Ok(());
        };
        self.store
            .create_collection(insight_collection_schema(&self.collection, first.len() as u64))
            .await?;

        let mut points = Vec::with_capacity(insights.len());
        for (insight, vector) in insights {
            points.push(VectorPoint {
                id: insight.point_id(),
                vector: vector.clone(),
                payload: InsightPayload::from_insight(insight).to_payload()?,
            });
        }
        self.store.upsert(&self.collection, points).await?;
        tracing::debug!(count = insights.len(), collection = %self.collection, "recorded insights");
        Ok(())
    }
}

impl InsightIndex for VectorInsightIndex {
    fn search<'a>(&'a self, files: &'a [String]) -> BoxFuture<'a, Result<Vec<Insight>>> {
        Box::pin(async move {
            if files.is_empty() || !self.store.collection_exists(&self.collection).await? {
                return Ok(Vec::new());
            }
            let filter = VectorFilter::must(vec![Condition::matches_any(
                fields::FILE_PATH,
                files.iter().map(String::as_str),
            )]);
            let points = self
                .store
                .scroll(&self.collection, Some(filter), self.limit)
                .await?;

            let mut insights = Vec::with_capacity(points.len());
            for point in points {
                match InsightPayload::from_payload(&point.payload) {
                    Ok(payload) => insights.push(payload.into_insight()),
                    Err(e) => tracing::warn!(id = %point.id, "skipping malformed insight: {e}"),
                }
            }
            Ok(insights)
        })
    }
}
