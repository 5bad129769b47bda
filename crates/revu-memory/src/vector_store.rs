use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::VectorStoreError;
use crate::filter::VectorFilter;

pub type Payload = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// A point returned by a filtered scan, without a similarity score.
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: String,
    pub payload: Payload,
}

/// Payload field type for index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Keyword,
    Integer,
    Bool,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub vector_size: u64,
    /// Payload fields to index for filtering.
    #[serde(default)]
    pub indexed_fields: Vec<(String, FieldKind)>,
}

impl CollectionSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, vector_size: u64) -> Self {
        Self {
            name: name.into(),
            vector_size,
            indexed_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_index(mut self, field: &str, kind: FieldKind) -> Self {
        self.indexed_fields.push((field.to_owned(), kind));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub points_count: u64,
    pub vector_size: u64,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub limit: u64,
    pub filter: Option<VectorFilter>,
    pub score_threshold: Option<f32>,
    pub with_payload: bool,
}

impl SearchRequest {
    #[must_use]
    pub fn new(vector: Vec<f32>, limit: u64) -> Self {
        Self {
            vector,
            limit,
            filter: None,
            score_threshold: None,
            with_payload: true,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: VectorFilter) -> Self {
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    #[must_use]
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    fn create_collection(
        &self,
        schema: CollectionSchema,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or replace points by id.
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    /// Return up to `limit` points matching the filter, in unspecified order.
    fn scroll(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<StoredPoint>, VectorStoreError>>;

    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<CollectionInfo, VectorStoreError>>;
}
