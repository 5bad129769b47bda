//! Project indexing orchestrator: walk → chunk → embed → store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use revu_llm::{EmbedInput, EmbeddingProvider, LlmError};
use revu_memory::{Condition, RetryPolicy, VectorFilter, VectorPoint, VectorStore, retry_with_backoff};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::EmbeddingCache;
use crate::chunker::{ChunkerConfig, CodeChunk, chunk_file};
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result};
use crate::payload::{ChunkPayload, Provenance, chunk_collection_schema, fields};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Files processed concurrently, and the unit of cancellation.
    pub batch_size: usize,
    #[serde(skip)]
    pub retry: RetryPolicy,
    /// Record per-file and per-batch store failures instead of aborting.
    pub skip_errors: bool,
    pub max_file_bytes: u64,
    /// Deadline for each embedding or upsert call.
    pub timeout: Duration,
    pub collection: String,
    /// Expected embedding dimension. When set, the collection is created
    /// with it and embeddings of any other length are rejected.
    pub vector_size: Option<u64>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            batch_size: 10,
            retry: RetryPolicy::default(),
            skip_errors: true,
            max_file_bytes: 1024 * 1024,
            timeout: Duration::from_secs(30),
            collection: "revu_code_chunks".into(),
            vector_size: None,
        }
    }
}

impl IndexerConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] for a zero batch size or vector
    /// size, an empty collection name, or an invalid chunker config.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IndexError::validation("batch_size", "must be at least 1"));
        }
        if self.collection.is_empty() {
            return Err(IndexError::validation("collection", "must not be empty"));
        }
        if self.vector_size == Some(0) {
            return Err(IndexError::validation("vector_size", "must be at least 1"));
        }
        self.chunker.validate()
    }
}

/// Summary of an indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    /// Points written to the store.
    pub chunks_created: usize,
    /// Of `chunks_created`, vectors served from the embedding cache.
    pub chunks_cached: usize,
    /// Points deleted because their line range or their file is gone.
    pub chunks_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Chunk ids currently stored, keyed by file path.
type StoredChunks = HashMap<String, HashSet<String>>;

struct PreparedFile {
    rel_path: String,
    chunks: Vec<CodeChunk>,
}

/// Orchestrates code indexing over a project tree.
pub struct CodeIndexer<E: EmbeddingProvider> {
    store: Arc<dyn VectorStore>,
    embedder: Arc<E>,
    cache: Option<Arc<EmbeddingCache>>,
    config: IndexerConfig,
    running: Mutex<()>,
}

impl<E: EmbeddingProvider> CodeIndexer<E> {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<E>, config: IndexerConfig) -> Self {
        Self {
            store,
            embedder,
            cache: None,
            config,
            running: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Index every eligible file under `root`.
    ///
    /// Per-file read and chunking failures, per-item embedding failures and
    /// (with `skip_errors`) store failures are collected in the report.
    ///
    /// Points a re-indexed file no longer produces are deleted once its new
    /// chunks are stored, and files missing from the tree lose all of theirs.
    /// A file that failed to read or store keeps its previous points.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IndexingInProgress`] if another run holds this
    /// indexer, [`IndexError::Aborted`] once `cancel` fires between batches,
    /// [`IndexError::Embedding`] when every item of a batch fails, and the
    /// first store error when `skip_errors` is off.
    pub async fn index_project(
        &self,
        root: &Path,
        provenance: &Provenance,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| IndexError::IndexingInProgress)?;
        self.config.validate()?;

        let start = Instant::now();
        let mut report = IndexReport::default();

        let mut stored = self.stored_chunks().await?;
        let mut seen: HashSet<String> = HashSet::new();

        let files = walk(root);
        report.files_scanned = files.len();
        let total_batches = files.len().div_ceil(self.config.batch_size);
        tracing::info!(files = files.len(), batches = total_batches, "indexing started");

        let mut collection_ready = false;
        for (i, batch) in files.chunks(self.config.batch_size).enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(batch = i + 1, "indexing aborted");
                return Err(IndexError::Aborted);
            }

            let prepared = join_all(batch.iter().map(|path| self.prepare_file(root, path))).await;
            let mut ready = Vec::with_capacity(prepared.len());
            for (path, outcome) in batch.iter().zip(prepared) {
                match outcome {
                    Ok(Some(file)) => {
                        seen.insert(file.rel_path.clone());
                        ready.push(file);
                    }
                    Ok(None) => {}
                    Err(e) if self.config.skip_errors => {
                        let rel_path = relative(root, path);
                        report.errors.push(format!("{rel_path}: {e}"));
                        seen.insert(rel_path);
                    }
                    Err(e) => return Err(e),
                }
            }

            let settled = self
                .store_batch(&ready, provenance, &mut collection_ready, &mut report)
                .await?;
            for (file, settled) in ready.iter().zip(settled) {
                let Some(previous) = stored.remove(&file.rel_path) else {
                    continue;
                };
                if settled {
                    let current: HashSet<&str> = file.chunks.iter().map(|c| c.id.as_str()).collect();
                    let stale = previous
                        .into_iter()
                        .filter(|id| !current.contains(id.as_str()))
                        .collect();
                    self.remove_chunks(&file.rel_path, stale, &mut report).await?;
                }
            }
            tracing::info!(
                progress = format_args!("{}/{total_batches}", i + 1),
                created = report.chunks_created,
                cached = report.chunks_cached,
            );
        }

        let mut gone: Vec<(String, HashSet<String>)> = stored
            .into_iter()
            .filter(|(path, _)| !seen.contains(path))
            .collect();
        gone.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, ids) in gone {
            tracing::debug!(file = %path, chunks = ids.len(), "removing chunks of deleted file");
            self.remove_chunks(&path, ids.into_iter().collect(), &mut report)
                .await?;
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            files = report.files_indexed,
            chunks = report.chunks_created,
            removed = report.chunks_removed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Replace the stored chunks of a single file.
    ///
    /// # Errors
    ///
    /// Same as [`index_project`](Self::index_project), plus the error of the
    /// file itself, which is never skipped.
    pub async fn reindex_file(
        &self,
        root: &Path,
        abs_path: &Path,
        provenance: &Provenance,
    ) -> Result<IndexReport> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| IndexError::IndexingInProgress)?;
        self.config.validate()?;

        let start = Instant::now();
        let rel_path = relative(root, abs_path);
        if self.store.collection_exists(&self.config.collection).await? {
            let filter =
                VectorFilter::must(vec![Condition::matches_value(fields::FILE_PATH, rel_path.as_str())]);
            self.store
                .delete_by_filter(&self.config.collection, filter)
                .await?;
        }

        let mut report = IndexReport {
            files_scanned: 1,
            ..IndexReport::default()
        };
        let mut collection_ready = false;
        if let Some(file) = self.prepare_file(root, abs_path).await? {
            self.store_batch(&[file], provenance, &mut collection_ready, &mut report)
                .await?;
        }
        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok(report)
    }

    /// Read and chunk one file. `None` for files that are skipped: too
    /// large, binary, or not valid UTF-8.
    async fn prepare_file(&self, root: &Path, path: &Path) -> Result<Option<PreparedFile>> {
        let rel_path = relative(root, path);
        let size = tokio::fs::metadata(path).await?.len();
        if size > self.config.max_file_bytes {
            tracing::debug!(file = %rel_path, size, "skipping oversized file");
            return Ok(None);
        }
        let bytes = tokio::fs::read(path).await?;
        if bytes.contains(&0) {
            tracing::debug!(file = %rel_path, "skipping binary file");
            return Ok(None);
        }
        let Ok(source) = String::from_utf8(bytes) else {
            tracing::debug!(file = %rel_path, "skipping non-UTF-8 file");
            return Ok(None);
        };

        let result = chunk_file(&source, &rel_path, &self.config.chunker)?;
        if result.used_fallback {
            tracing::debug!(file = %rel_path, strategy = result.strategy.name(), "chunked with fallback");
        }
        Ok(Some(PreparedFile {
            rel_path,
            chunks: result.chunks,
        }))
    }

    /// Every stored chunk id, grouped by the file it came from.
    async fn stored_chunks(&self) -> Result<StoredChunks> {
        let collection = self.config.collection.as_str();
        let mut stored = StoredChunks::new();
        if !self.store.collection_exists(collection).await? {
            return Ok(stored);
        }
        for point in self.store.scroll(collection, None, usize::MAX).await? {
            let field = |name: &str| point.payload.get(name).and_then(|v| v.as_str());
            if let (Some(path), Some(id)) = (field(fields::FILE_PATH), field(fields::CHUNK_ID)) {
                stored.entry(path.to_owned()).or_default().insert(id.to_owned());
            }
        }
        Ok(stored)
    }

    async fn remove_chunks(
        &self,
        rel_path: &str,
        ids: Vec<String>,
        report: &mut IndexReport,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let filter = VectorFilter::must(vec![
            Condition::matches_value(fields::FILE_PATH, rel_path),
            Condition::matches_any(fields::CHUNK_ID, ids.iter().map(String::as_str)),
        ]);
        match self
            .store
            .delete_by_filter(&self.config.collection, filter)
            .await
        {
            Ok(()) => report.chunks_removed += ids.len(),
            Err(e) if self.config.skip_errors => {
                tracing::warn!(file = rel_path, "stale chunk cleanup failed: {e}");
                report.errors.push(format!("cleanup {rel_path}: {e}"));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Embed and upsert the chunks of `files`. Returns, per file, whether the
    /// store now holds its current chunks.
    async fn store_batch(
        &self,
        files: &[PreparedFile],
        provenance: &Provenance,
        collection_ready: &mut bool,
        report: &mut IndexReport,
    ) -> Result<Vec<bool>> {
        let model = self.embedder.model().to_owned();
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::new();
        let mut chunks: Vec<(usize, CodeChunk)> = Vec::new();
        let mut inputs = Vec::new();

        for (file_idx, file) in files.iter().enumerate() {
            for chunk in &file.chunks {
                let cached = self
                    .cache
                    .as_ref()
                    .and_then(|c| c.get(&chunk.content_hash))
                    .filter(|entry| entry.model == model)
                    .map(|entry| entry.vector);
                if cached.is_none() {
                    inputs.push(EmbedInput::new(
                        chunks.len().to_string(),
                        contextualize_for_embedding(chunk),
                    ));
                }
                vectors.push(cached);
                chunks.push((file_idx, chunk.clone()));
            }
        }
        if chunks.is_empty() {
            return Ok(vec![true; files.len()]);
        }
        let cached_count = vectors.iter().filter(|v| v.is_some()).count();

        if !inputs.is_empty() {
            let batch = tokio::time::timeout(self.config.timeout, self.embedder.embed_batch(&inputs))
                .await
                .map_err(|_| IndexError::Timeout {
                    operation: "embed batch".into(),
                })??;
            if batch.all_failed() {
                return Err(LlmError::BatchFailed {
                    failed: batch.results.len(),
                    total: inputs.len(),
                }
                .into());
            }
            for output in batch.results {
                let Some(idx) = output.id.parse::<usize>().ok().filter(|i| *i < chunks.len()) else {
                    continue;
                };
                match output.error {
                    None => {
                        if let Some(cache) = &self.cache {
                            cache.set(&chunks[idx].1.content_hash, output.vector.clone(), &model);
                        }
                        vectors[idx] = Some(output.vector);
                    }
                    Some(error) => {
                        let chunk = &chunks[idx].1;
                        report.errors.push(format!(
                            "{}:{}-{}: {error}",
                            chunk.file_path, chunk.start_line, chunk.end_line
                        ));
                    }
                }
            }
        }

        let mut points = Vec::with_capacity(chunks.len());
        let mut stored_per_file = vec![0usize; files.len()];
        for ((file_idx, chunk), vector) in chunks.iter().zip(vectors) {
            let Some(vector) = vector else { continue };
            points.push(VectorPoint {
                id: chunk.id.clone(),
                vector,
                payload: ChunkPayload::from_chunk(chunk, provenance).to_payload()?,
            });
            stored_per_file[*file_idx] += 1;
        }
        let Some(dimensions) = points.first().map(|p| p.vector.len() as u64) else {
            return Ok(files.iter().map(|f| f.chunks.is_empty()).collect());
        };

        if let Err(e) = self.write_points(points.clone(), dimensions, collection_ready).await {
            if !self.config.skip_errors {
                return Err(e);
            }
            tracing::warn!("batch upsert failed: {e}");
            let names: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
            report
                .errors
                .push(format!("upsert [{}]: {e}", names.join(", ")));
            return Ok(vec![false; files.len()]);
        }

        report.chunks_created += points.len();
        report.chunks_cached += cached_count;
        report.files_indexed += stored_per_file.iter().filter(|n| **n > 0).count();
        tracing::debug!(points = points.len(), cached = cached_count, "batch stored");
        Ok(files
            .iter()
            .zip(stored_per_file)
            .map(|(f, n)| n > 0 || f.chunks.is_empty())
            .collect())
    }

    async fn write_points(
        &self,
        points: Vec<VectorPoint>,
        dimensions: u64,
        collection_ready: &mut bool,
    ) -> Result<()> {
        let collection = self.config.collection.as_str();
        let store = &self.store;
        let timeout = self.config.timeout;

        if let Some(expected) = self.config.vector_size
            && expected != dimensions
        {
            return Err(IndexError::validation(
                "vector_size",
                format!("configured {expected}, but the embedder produced {dimensions}"),
            ));
        }
        if !*collection_ready {
            store
                .create_collection(chunk_collection_schema(collection, dimensions))
                .await?;
            *collection_ready = true;
        }

        let points = &points;
        retry_with_backoff("upsert chunks", &self.config.retry, move || {
            let points = points.clone();
            async move {
                match tokio::time::timeout(timeout, store.upsert(collection, points)).await {
                    Ok(result) => result.map_err(IndexError::from),
                    Err(_) => Err(IndexError::Timeout {
                        operation: "upsert".into(),
                    }),
                }
            }
        })
        .await
    }
}

/// Files under `root`, honoring `.gitignore` and skipping hidden entries.
fn walk(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .map(ignore::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
