//! Vector store abstraction with an in-memory and a Qdrant backend, the
//! backend-neutral filter model, and token estimation.

pub mod error;
pub mod filter;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod retry;
pub mod tokens;
pub mod vector_store;

pub use error::{PayloadError, VectorStoreError};
pub use filter::{Condition, FieldValue, RangeBounds, VectorFilter, glob_matches};
pub use in_memory_store::{InMemoryVectorStore, cosine_similarity};
pub use qdrant_ops::QdrantVectorStore;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use tokens::{estimate_tokens, max_chars_for_tokens};
pub use vector_store::{
    CollectionInfo, CollectionSchema, FieldKind, Payload, ScoredVectorPoint, SearchRequest,
    StoredPoint, VectorPoint, VectorStore,
};
