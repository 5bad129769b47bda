//! Versioned point payload schemas for the chunk and insight collections.
//!
//! Payloads are validated at the store boundary: unknown or missing fields,
//! a foreign schema version, or an impossible line range are rejected with
//! [`PayloadError`] instead of flowing on as loosely typed JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use revu_memory::{CollectionSchema, FieldKind, Payload, PayloadError};
use serde::{Deserialize, Serialize};

use crate::chunker::{ChunkType, CodeChunk};
use crate::insights::{Insight, Severity};
use crate::languages::Lang;

pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// Payload field names used by filters and indexes.
pub mod fields {
    pub const CHUNK_ID: &str = "chunk_id";
    pub const FILE_PATH: &str = "file_path";
    pub const LANGUAGE: &str = "language";
    pub const CHUNK_TYPE: &str = "chunk_type";
    pub const COMPLEXITY: &str = "complexity";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const IMPORTS: &str = "imports";
    pub const CONTENT_HASH: &str = "content_hash";
    pub const COMMIT: &str = "commit";
    pub const AUTHOR: &str = "author";
    pub const CREATED_AT: &str = "created_at";
    pub const METADATA: &str = "metadata";
    pub const LINE: &str = "line";
    pub const SEVERITY: &str = "severity";
    pub const CATEGORY: &str = "category";
}

/// Where an indexed chunk came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub commit: Option<String>,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkPayload {
    pub schema_version: u32,
    pub chunk_id: String,
    pub file_path: String,
    pub language: Lang,
    pub chunk_type: ChunkType,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub complexity: u32,
    pub dependencies: Vec<String>,
    pub imports: Vec<String>,
    pub content_hash: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ChunkPayload {
    #[must_use]
    pub fn from_chunk(chunk: &CodeChunk, provenance: &Provenance) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            chunk_id: chunk.id.clone(),
            file_path: chunk.file_path.clone(),
            language: chunk.language,
            chunk_type: chunk.chunk_type,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.content.clone(),
            complexity: chunk.complexity_score,
            dependencies: chunk.dependencies.clone(),
            imports: chunk.imports.clone(),
            content_hash: chunk.content_hash.clone(),
            name: chunk.name.clone(),
            commit: provenance.commit.clone(),
            author: provenance.author.clone(),
            created_at: provenance.created_at.map(|t| t.timestamp()),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// # Errors
    ///
    /// Returns [`PayloadError::Invalid`] if serialization fails.
    pub fn to_payload(&self) -> Result<Payload, PayloadError> {
        to_payload(self)
    }

    /// Parse and validate a stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] for a foreign schema version, unknown or
    /// missing fields, or an invalid line range.
    pub fn from_payload(payload: &Payload) -> Result<Self, PayloadError> {
        check_version(payload)?;
        let parsed: Self = from_payload(payload)?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), PayloadError> {
        if self.chunk_id.is_empty() {
            return Err(field_error("chunk_id", "must not be empty"));
        }
        if self.file_path.is_empty() {
            return Err(field_error("file_path", "must not be empty"));
        }
        if self.start_line == 0 {
            return Err(field_error("start_line", "lines are 1-based"));
        }
        if self.end_line < self.start_line {
            return Err(field_error(
                "end_line",
                format!("{} precedes start_line {}", self.end_line, self.start_line),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    #[must_use]
    pub fn into_chunk(self) -> CodeChunk {
        CodeChunk {
            id: self.chunk_id,
            content: self.content,
            language: self.language,
            start_line: self.start_line,
            end_line: self.end_line,
            chunk_type: self.chunk_type,
            complexity_score: self.complexity,
            dependencies: self.dependencies,
            imports: self.imports,
            file_path: self.file_path,
            name: self.name,
            content_hash: self.content_hash,
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsightPayload {
    pub schema_version: u32,
    pub file_path: String,
    pub line: usize,
    #[serde(default)]
    pub end_line: Option<usize>,
    pub category: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl InsightPayload {
    #[must_use]
    pub fn from_insight(insight: &Insight) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            file_path: insight.file.clone(),
            line: insight.line,
            end_line: insight.end_line,
            category: insight.category.clone(),
            severity: insight.severity,
            summary: insight.summary.clone(),
            suggestion: insight.suggestion.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns [`PayloadError::Invalid`] if serialization fails.
    pub fn to_payload(&self) -> Result<Payload, PayloadError> {
        to_payload(self)
    }

    /// # Errors
    ///
    /// Returns [`PayloadError`] for a foreign schema version, unknown or
    /// missing fields, or an invalid line.
    pub fn from_payload(payload: &Payload) -> Result<Self, PayloadError> {
        check_version(payload)?;
        let parsed: Self = from_payload(payload)?;
        if parsed.line == 0 {
            return Err(field_error("line", "lines are 1-based"));
        }
        if parsed.end_line.is_some_and(|end| end < parsed.line) {
            return Err(field_error("end_line", "precedes line"));
        }
        Ok(parsed)
    }

    #[must_use]
    pub fn into_insight(self) -> Insight {
        Insight {
            file: self.file_path,
            line: self.line,
            end_line: self.end_line,
            category: self.category,
            severity: self.severity,
            summary: self.summary,
            suggestion: self.suggestion,
        }
    }
}

/// Collection schema for code chunks, indexing the filterable fields.
#[must_use]
pub fn chunk_collection_schema(name: &str, vector_size: u64) -> CollectionSchema {
    CollectionSchema::new(name, vector_size)
        .with_index(fields::FILE_PATH, FieldKind::Keyword)
        .with_index(fields::LANGUAGE, FieldKind::Keyword)
        .with_index(fields::CHUNK_TYPE, FieldKind::Keyword)
        .with_index(fields::COMMIT, FieldKind::Keyword)
        .with_index(fields::AUTHOR, FieldKind::Keyword)
        .with_index(fields::CONTENT_HASH, FieldKind::Keyword)
        .with_index(fields::COMPLEXITY, FieldKind::Integer)
        .with_index(fields::CREATED_AT, FieldKind::Integer)
}

#[must_use]
pub fn insight_collection_schema(name: &str, vector_size: u64) -> CollectionSchema {
    CollectionSchema::new(name, vector_size)
        .with_index(fields::FILE_PATH, FieldKind::Keyword)
        .with_index(fields::LINE, FieldKind::Integer)
}

fn check_version(payload: &Payload) -> Result<(), PayloadError> {
    let found = payload
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| field_error("schema_version", "missing or not an integer"))?;
    if found != u64::from(PAYLOAD_SCHEMA_VERSION) {
        return Err(PayloadError::Version {
            expected: PAYLOAD_SCHEMA_VERSION,
            found: u32::try_from(found).unwrap_or(u32::MAX),
        });
    }
    Ok(())
}

fn to_payload<T: Serialize>(value: &T) -> Result<Payload, PayloadError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(field_error("payload", "must serialize to an object")),
    }
}

fn from_payload<T: for<'de> Deserialize<'de>>(payload: &Payload) -> Result<T, PayloadError> {
    let object: serde_json::Map<String, serde_json::Value> =
        payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

fn field_error(field: &'static str, message: impl Into<String>) -> PayloadError {
    PayloadError::Field {
        field,
        message: message.into(),
    }
}
