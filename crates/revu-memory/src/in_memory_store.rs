use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::VectorStoreError;
use crate::filter::VectorFilter;
use crate::vector_store::{
    BoxFuture, CollectionInfo, CollectionSchema, Payload, ScoredVectorPoint, SearchRequest,
    StoredPoint, VectorPoint, VectorStore,
};

struct StoredVector {
    vector: Vec<f32>,
    payload: Payload,
}

struct InMemoryCollection {
    vector_size: u64,
    points: HashMap<String, StoredVector>,
}

/// Exact, brute-force vector store. Evaluates filters with
/// [`VectorFilter::matches`] and ranks by cosine similarity.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn lock_err(e: impl std::fmt::Display) -> VectorStoreError {
    VectorStoreError::Connection(format!("lock poisoned: {e}"))
}

impl VectorStore for InMemoryVectorStore {
    fn create_collection(
        &self,
        schema: CollectionSchema,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            let mut cols = self.collections.write().map_err(lock_err)?;
            cols.entry(schema.name)
                .or_insert_with(|| InMemoryCollection {
                    vector_size: schema.vector_size,
                    points: HashMap::new(),
                });
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.collections.read().map_err(lock_err)?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.collections.write().map_err(lock_err)?;
            cols.remove(&collection);
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
            let mut cols = self.collections.write().map_err(lock_err)?;
            let col = cols
                .get_mut(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;
            for p in &points {
                if p.vector.len() as u64 != col.vector_size {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: col.vector_size,
                        actual: p.vector.len(),
                    });
                }
            }
            for p in points {
                col.points.insert(
                    p.id,
                    StoredVector {
                        vector: p.vector,
                        payload: p.payload,
                    },
                );
            }
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
            let cols = self.collections.read().map_err(lock_err)?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;

            let empty_filter = VectorFilter::default();
            let f = request.filter.as_ref().unwrap_or(&empty_filter);

            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| f.matches(&sp.payload))
                .map(|(id, sp)| ScoredVectorPoint {
                    id: id.clone(),
                    score: cosine_similarity(&request.vector, &sp.vector),
                    payload: if request.with_payload {
                        sp.payload.clone()
                    } else {
                        Payload::new()
                    },
                })
                .filter(|p| request.score_threshold.is_none_or(|t| p.score >= t))
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            scored.truncate(usize::try_from(request.limit).unwrap_or(usize::MAX));
            Ok(scored)
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
            let cols = self.collections.read().map_err(lock_err)?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;
            let f = filter.unwrap_or_default();
            let mut points: Vec<StoredPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| f.matches(&sp.payload))
                .map(|(id, sp)| StoredPoint {
                    id: id.clone(),
                    payload: sp.payload.clone(),
                })
                .collect();
            points.sort_by(|a, b| a.id.cmp(&b.id));
            points.truncate(limit);
            Ok(points)
        })
    }

    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.collections.write().map_err(lock_err)?;
            if let Some(col) = cols.get_mut(&collection) {
                col.points.retain(|_, sp| !filter.matches(&sp.payload));
            }
            Ok(())
        })
    }

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<CollectionInfo, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.collections.read().map_err(lock_err)?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.clone()))?;
            Ok(CollectionInfo {
                name: collection,
                points_count: col.points.len() as u64,
                vector_size: col.vector_size,
            })
        })
    }
}
