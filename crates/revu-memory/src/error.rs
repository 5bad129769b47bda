#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: u64, actual: usize },
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A point payload that does not conform to its collection's schema.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("unsupported schema version {found} (expected {expected})")]
    Version { expected: u32, found: u32 },
    #[error("payload rejected: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("invalid field `{field}`: {message}")]
    Field {
        field: &'static str,
        message: String,
    },
}
