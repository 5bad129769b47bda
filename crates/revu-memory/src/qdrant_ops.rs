//! Qdrant-backed [`VectorStore`].

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition as QdrantCondition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, ListValue, PointId, PointStruct, Range,
    ScalarQuantizationBuilder, ScoredPoint, ScrollPointsBuilder, SearchPointsBuilder, Struct,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder, point_id::PointIdOptions,
    value::Kind, vectors_config,
};

use crate::error::VectorStoreError;
use crate::filter::{Condition, FieldValue, VectorFilter, glob_literal_fragment};
use crate::vector_store::{
    BoxFuture, CollectionInfo, CollectionSchema, FieldKind, Payload, ScoredVectorPoint,
    SearchRequest, StoredPoint, VectorPoint, VectorStore,
};

const SCROLL_PAGE: u32 = 256;

/// Thin wrapper over the [`Qdrant`] client.
///
/// Glob `Pattern` clauses are approximated with full-text matching on their
/// longest literal fragment, so callers needing exact glob semantics should
/// re-check hits with [`VectorFilter::matches`].
#[derive(Clone)]
pub struct QdrantVectorStore {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantVectorStore").finish_non_exhaustive()
    }
}

impl QdrantVectorStore {
    /// # Errors
    ///
    /// Returns [`VectorStoreError::Connection`] if the client cannot be built.
    pub fn new(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn client(&self) -> &Qdrant {
        &self.client
    }

    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<(), VectorStoreError> {
        let collection_err = |e: qdrant_client::QdrantError| VectorStoreError::Collection(e.to_string());
        if self
            .client
            .collection_exists(&schema.name)
            .await
            .map_err(collection_err)?
        {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&schema.name)
                    .vectors_config(VectorParamsBuilder::new(schema.vector_size, Distance::Cosine))
                    .quantization_config(ScalarQuantizationBuilder::default()),
            )
            .await
            .map_err(collection_err)?;

        for (field, kind) in &schema.indexed_fields {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &schema.name,
                    field,
                    field_type(*kind),
                ))
                .await
                .map_err(collection_err)?;
        }
        tracing::info!(
            collection = %schema.name,
            vector_size = schema.vector_size,
            indexes = schema.indexed_fields.len(),
            "created qdrant collection"
        );
        Ok(())
    }
}

fn field_type(kind: FieldKind) -> FieldType {
    match kind {
        FieldKind::Keyword => FieldType::Keyword,
        FieldKind::Integer => FieldType::Integer,
        FieldKind::Bool => FieldType::Bool,
        FieldKind::Text => FieldType::Text,
    }
}

impl VectorStore for QdrantVectorStore {
    fn create_collection(
        &self,
        schema: CollectionSchema,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move { self.ensure_collection(&schema).await })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let qdrant_points = points
                .into_iter()
                .map(|p| Ok(PointStruct::new(p.id, p.vector, payload_to_qdrant(p.payload)?)))
                .collect::<Result<Vec<_>, VectorStoreError>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, qdrant_points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut builder = SearchPointsBuilder::new(&collection, request.vector, request.limit)
                .with_payload(request.with_payload);
            if let Some(filter) = request.filter {
                builder = builder.filter(vector_filter_to_qdrant(filter));
            }
            if let Some(threshold) = request.score_threshold {
                builder = builder.score_threshold(threshold);
            }
            let response = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            Ok(response.result.into_iter().map(scored_point_to_vector).collect())
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<StoredPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let qdrant_filter = filter.map(vector_filter_to_qdrant);
            let mut out = Vec::new();
            let mut offset: Option<PointId> = None;

            while out.len() < limit {
                let page = u32::try_from(limit - out.len())
                    .unwrap_or(SCROLL_PAGE)
                    .min(SCROLL_PAGE);
                let mut builder = ScrollPointsBuilder::new(&collection)
                    .with_payload(true)
                    .with_vectors(false)
                    .limit(page);
                if let Some(f) = &qdrant_filter {
                    builder = builder.filter(f.clone());
                }
                if let Some(off) = offset.take() {
                    builder = builder.offset(off);
                }
                let response = self
                    .client
                    .scroll(builder)
                    .await
                    .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;

                out.extend(response.result.into_iter().map(|p| StoredPoint {
                    id: point_id_to_string(p.id),
                    payload: payload_from_qdrant(p.payload),
                }));

                match response.next_page_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
            out.truncate(limit);
            Ok(out)
        })
    }

    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&collection)
                        .points(vector_filter_to_qdrant(filter))
                        .wait(true),
                )
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(())
        })
    }

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<CollectionInfo, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let response = self
                .client
                .collection_info(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let info = response
                .result
                .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.clone()))?;
            let vector_size = info
                .config
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|v| v.config)
                .and_then(|c| match c {
                    vectors_config::Config::Params(params) => Some(params.size),
                    vectors_config::Config::ParamsMap(_) => None,
                })
                .unwrap_or_default();
            Ok(CollectionInfo {
                name: collection,
                points_count: info.points_count.unwrap_or_default(),
                vector_size,
            })
        })
    }
}

pub(crate) fn vector_filter_to_qdrant(filter: VectorFilter) -> Filter {
    Filter {
        must: filter.must.into_iter().map(condition_to_qdrant).collect(),
        must_not: filter.must_not.into_iter().map(condition_to_qdrant).collect(),
        should: filter.should.into_iter().map(condition_to_qdrant).collect(),
        ..Filter::default()
    }
}

fn condition_to_qdrant(cond: Condition) -> QdrantCondition {
    match cond {
        Condition::Match { field, value } => match value {
            FieldValue::Integer(v) => QdrantCondition::matches(field, v),
            FieldValue::Bool(v) => QdrantCondition::matches(field, v),
            FieldValue::Text(v) => QdrantCondition::matches(field, v),
        },
        Condition::MatchAny { field, values } => match_any_to_qdrant(field, values),
        Condition::Pattern { field, glob } => {
            let fragment = glob_literal_fragment(&glob);
            if fragment.is_empty() {
                // Matches everything; express as "field is present".
                Filter::must_not(vec![QdrantCondition::is_empty(field)]).into()
            } else {
                QdrantCondition::matches_text(field, fragment)
            }
        }
        Condition::Range { field, bounds } => QdrantCondition::range(
            field,
            Range {
                lt: bounds.lt,
                gt: bounds.gt,
                gte: bounds.gte,
                lte: bounds.lte,
            },
        ),
        Condition::IsEmpty { field } => QdrantCondition::is_empty(field),
    }
}

fn match_any_to_qdrant(field: String, values: Vec<FieldValue>) -> QdrantCondition {
    let texts: Option<Vec<String>> = values
        .iter()
        .map(|v| match v {
            FieldValue::Text(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    if let Some(texts) = texts {
        return QdrantCondition::matches(field, texts);
    }
    let ints: Option<Vec<i64>> = values
        .iter()
        .map(|v| match v {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        })
        .collect();
    if let Some(ints) = ints {
        return QdrantCondition::matches(field, ints);
    }
    // Mixed types: one equality per value under a nested `should`.
    let alternatives: Vec<_> = values
        .into_iter()
        .map(|value| {
            condition_to_qdrant(Condition::Match {
                field: field.clone(),
                value,
            })
        })
        .collect();
    Filter::should(alternatives).into()
}

fn payload_to_qdrant(payload: Payload) -> Result<HashMap<String, QdrantValue>, VectorStoreError> {
    serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))
        .map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn payload_from_qdrant(payload: HashMap<String, QdrantValue>) -> Payload {
    payload
        .into_iter()
        .map(|(k, v)| (k, value_from_qdrant(v)))
        .collect()
}

fn value_from_qdrant(value: QdrantValue) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(ListValue { values })) => {
            serde_json::Value::Array(values.into_iter().map(value_from_qdrant).collect())
        }
        Some(Kind::StructValue(Struct { fields })) => serde_json::Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, value_from_qdrant(v)))
                .collect(),
        ),
    }
}

fn point_id_to_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn scored_point_to_vector(point: ScoredPoint) -> ScoredVectorPoint {
    ScoredVectorPoint {
        id: point_id_to_string(point.id),
        score: point.score,
        payload: payload_from_qdrant(point.payload),
    }
}
