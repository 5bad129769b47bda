//! Embedding cache keyed by chunk content hash.
//!
//! Three independent bounds apply on every [`EmbeddingCache::set`], in order:
//! entries older than the TTL are dropped, then least-recently-used entries
//! are evicted until the entry count leaves room, then until the byte total
//! leaves room. Entries are also expired lazily on access and by
//! [`EmbeddingCache::spawn_sweeper`].
//!
//! Recency is tracked with a monotonically increasing access sequence kept in
//! a `BTreeMap`, so LRU eviction and TTL expiry are `O(log n)` per entry.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_size_bytes: usize,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    /// Snapshot file loaded by [`EmbeddingCache::open`].
    pub persist_path: Option<PathBuf>,
    /// Rewrite the snapshot after every mutation.
    pub persist_on_mutation: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_size_bytes: 256 * 1024 * 1024,
            ttl: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            persist_path: None,
            persist_on_mutation: false,
        }
    }
}

impl CacheConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] for zero bounds or intervals.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(IndexError::validation("cache.max_entries", "must be at least 1"));
        }
        if self.max_size_bytes == 0 {
            return Err(IndexError::validation("cache.max_size_bytes", "must be at least 1"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(IndexError::validation(
                "cache.cleanup_interval",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub generated_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    /// Accounted size: eight bytes per vector component plus the serialized
    /// identity metadata. Fixed for the life of the entry.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        let metadata = serde_json::to_string(&(&self.content_hash, &self.model, self.generated_at))
            .map_or(self.content_hash.len() + self.model.len(), |s| s.len());
        self.vector.len() * 8 + metadata
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    size: usize,
    /// Position in the access order.
    seq: u64,
    /// Tiebreak for the expiry index.
    born: u64,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    by_access: BTreeMap<u64, String>,
    by_age: BTreeMap<(DateTime<Utc>, u64), String>,
    next_seq: u64,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, hash: &str) -> Option<Slot> {
        let slot = self.slots.remove(hash)?;
        self.by_access.remove(&slot.seq);
        self.by_age.remove(&(slot.entry.generated_at, slot.born));
        self.total_bytes -= slot.size;
        Some(slot)
    }

    fn insert(&mut self, entry: CacheEntry) {
        let size = entry.size_bytes();
        let seq = self.bump();
        let hash = entry.content_hash.clone();
        self.by_access.insert(seq, hash.clone());
        self.by_age.insert((entry.generated_at, seq), hash.clone());
        self.total_bytes += size;
        self.slots.insert(
            hash,
            Slot {
                entry,
                size,
                seq,
                born: seq,
            },
        );
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, hash)) = self.by_access.pop_first() else {
            return false;
        };
        if let Some(slot) = self.slots.remove(&hash) {
            self.by_age.remove(&(slot.entry.generated_at, slot.born));
            self.total_bytes -= slot.size;
            self.evictions += 1;
            tracing::debug!(hash = %hash, "evicted least recently used embedding");
        }
        true
    }

    fn expire(&mut self, now: DateTime<Utc>, ttl: TimeDelta) -> usize {
        let mut removed = 0;
        while let Some((&(generated_at, _), hash)) = self.by_age.first_key_value() {
            if now - generated_at <= ttl {
                break;
            }
            let hash = hash.clone();
            self.remove(&hash);
            removed += 1;
        }
        self.expirations += removed as u64;
        removed
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Bounded content-hash → vector cache, safe to share between workers.
///
/// Each method is atomic on its own; check-then-act sequences across calls
/// are not.
#[derive(Debug)]
pub struct EmbeddingCache {
    config: CacheConfig,
    ttl: TimeDelta,
    inner: Mutex<Inner>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let ttl = TimeDelta::from_std(config.ttl).unwrap_or(TimeDelta::MAX);
        Self {
            config,
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Create the cache and load the configured snapshot, if any. Expired
    /// entries in the snapshot are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid config or an unreadable snapshot.
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let cache = Self::new(config);
        if let Some(path) = cache.config.persist_path.clone()
            && path.exists()
        {
            let loaded = cache.load_snapshot(&path, Utc::now())?;
            tracing::info!(path = %path.display(), loaded, "embedding cache restored");
        }
        Ok(cache)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a vector, refreshing its recency. Expired entries are removed
    /// and reported as a miss.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<CacheEntry> {
        self.get_at(hash, Utc::now())
    }

    fn get_at(&self, hash: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let expired = match inner.slots.get(hash) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(slot) => now - slot.entry.generated_at > self.ttl,
        };
        if expired {
            inner.remove(hash);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        let seq = inner.bump();
        inner.hits += 1;
        let old_seq = {
            let slot = inner.slots.get_mut(hash)?;
            slot.entry.access_count += 1;
            slot.entry.last_accessed = now;
            std::mem::replace(&mut slot.seq, seq)
        };
        inner.by_access.remove(&old_seq);
        inner.by_access.insert(seq, hash.to_owned());
        inner.slots.get(hash).map(|s| s.entry.clone())
    }

    /// Store a vector. Returns `false` if the entry alone exceeds the byte
    /// budget and was not stored.
    pub fn set(&self, hash: &str, vector: Vec<f32>, model: &str) -> bool {
        let stored = self.set_at(hash, vector, model, Utc::now());
        if stored {
            self.persist_if_configured();
        }
        stored
    }

    fn set_at(&self, hash: &str, vector: Vec<f32>, model: &str, now: DateTime<Utc>) -> bool {
        let entry = CacheEntry {
            content_hash: hash.to_owned(),
            vector,
            model: model.to_owned(),
            generated_at: now,
            access_count: 0,
            last_accessed: now,
        };
        self.insert_entry(entry, now)
    }

    fn insert_entry(&self, entry: CacheEntry, now: DateTime<Utc>) -> bool {
        let size = entry.size_bytes();
        if self.config.max_entries == 0 || size > self.config.max_size_bytes {
            tracing::debug!(
                hash = %entry.content_hash,
                size,
                max = self.config.max_size_bytes,
                "embedding larger than cache budget, not cached"
            );
            return false;
        }

        let mut inner = self.lock();
        inner.remove(&entry.content_hash);
        inner.expire(now, self.ttl);
        while inner.slots.len() >= self.config.max_entries && inner.evict_lru() {}
        while inner.total_bytes + size > self.config.max_size_bytes && inner.evict_lru() {}
        inner.insert(entry);
        true
    }

    /// Whether a live entry exists. Does not count as an access.
    #[must_use]
    pub fn has(&self, hash: &str) -> bool {
        let now = Utc::now();
        let inner = self.lock();
        inner
            .slots
            .get(hash)
            .is_some_and(|s| now - s.entry.generated_at <= self.ttl)
    }

    pub fn delete(&self, hash: &str) -> bool {
        let removed = self.lock().remove(hash).is_some();
        if removed {
            self.persist_if_configured();
        }
        removed
    }

    /// Drop all entries. Statistics are kept.
    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.slots.clear();
            inner.by_access.clear();
            inner.by_age.clear();
            inner.total_bytes = 0;
        }
        self.persist_if_configured();
    }

    /// Remove every entry older than the TTL. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.lock().expire(Utc::now(), self.ttl)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.lock().total_bytes
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let requests = inner.hits + inner.misses;
        CacheStats {
            entries: inner.slots.len(),
            total_bytes: inner.total_bytes,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if requests == 0 {
                0.0
            } else {
                inner.hits as f64 / requests as f64
            },
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }

    /// Run [`purge_expired`](Self::purge_expired) every cleanup interval
    /// until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.config.cleanup_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "expired cached embeddings");
                        }
                    }
                    () = cancel.cancelled() => {
                        tracing::debug!("embedding cache sweeper stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Write the full cache to the configured snapshot path.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub fn save(&self) -> Result<()> {
        match &self.config.persist_path {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let inner = self.lock();
            Snapshot {
                version: SNAPSHOT_VERSION,
                entries: inner
                    .by_access
                    .values()
                    .filter_map(|hash| inner.slots.get(hash))
                    .map(|slot| slot.entry.clone())
                    .collect(),
            }
        };
        let json = serde_json::to_vec(&snapshot)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load_snapshot(&self, path: &Path, now: DateTime<Utc>) -> Result<usize> {
        let bytes = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::validation(
                "cache snapshot",
                format!(
                    "unsupported version {} (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            ));
        }
        let mut loaded = 0;
        for entry in snapshot.entries {
            if now - entry.generated_at > self.ttl {
                continue;
            }
            if self.insert_entry(entry, now) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    fn persist_if_configured(&self) {
        if self.config.persist_on_mutation
            && let Err(e) = self.save()
        {
            tracing::warn!("failed to persist embedding cache: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn config(max_entries: usize, max_size_bytes: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            max_size_bytes,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn set_then_get_counts_access() {
        let cache = EmbeddingCache::new(CacheConfig::default());
        assert!(cache.set("h1", vec![1.0, 2.0], "m"));
        let entry = cache.get("h1").unwrap();
        assert_eq!(entry.vector, vec![1.0, 2.0]);
        assert_eq!(entry.access_count, 1);
        assert_eq!(cache.get("h1").unwrap().access_count, 2);
        assert!(cache.get("nope").is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn entry_size_counts_vector_and_metadata() {
        let cache = EmbeddingCache::new(CacheConfig::default());
        cache.set("hash", vec![0.5; 4], "model");
        let entry = cache.get("hash").unwrap();
        let metadata =
            serde_json::to_string(&(&entry.content_hash, &entry.model, entry.generated_at)).unwrap();
        assert_eq!(entry.size_bytes(), 32 + metadata.len());
    }

    #[test]
    fn count_bound_evicts_oldest_insert() {
        let cache = EmbeddingCache::new(config(2, usize::MAX));
        cache.set("a", vec![0.0], "m");
        cache.set("b", vec![0.0], "m");
        cache.set("c", vec![0.0], "m");
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.has("b") && cache.has("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn count_bound_respects_recent_access() {
        let cache = EmbeddingCache::new(config(2, usize::MAX));
        cache.set("a", vec![0.0], "m");
        cache.set("b", vec![0.0], "m");
        assert!(cache.get("a").is_some());
        cache.set("c", vec![0.0], "m");
        assert!(cache.get("b").is_none());
        assert!(cache.has("a"));
    }

    #[test]
    fn byte_bound_evicts_until_entry_fits() {
        let probe = EmbeddingCache::new(CacheConfig::default());
        probe.set("a", vec![0.0; 10], "m");
        let one = probe.total_bytes();

        let cache = EmbeddingCache::new(config(100, one * 2 + one / 2));
        cache.set("a", vec![0.0; 10], "m");
        cache.set("b", vec![0.0; 10], "m");
        cache.set("c", vec![0.0; 10], "m");
        assert_eq!(cache.len(), 2);
        assert!(!cache.has("a"));
        assert!(cache.total_bytes() <= one * 2 + one / 2);
    }

    #[test]
    fn oversized_entry_is_refused() {
        let cache = EmbeddingCache::new(config(10, 64));
        cache.set("small", vec![], "m");
        assert!(!cache.set("big", vec![0.0; 100], "m"));
        assert!(cache.has("small"));
        assert!(!cache.has("big"));
    }

    #[test]
    fn replacing_keeps_accounting_consistent() {
        let cache = EmbeddingCache::new(CacheConfig::default());
        cache.set("a", vec![0.0; 4], "m");
        cache.set("a", vec![0.0; 2], "m");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), cache.get("a").unwrap().size_bytes());
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = EmbeddingCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            ..CacheConfig::default()
        });
        let start = Utc::now();
        cache.set_at("a", vec![1.0], "m", start);
        assert!(cache.get_at("a", start + TimeDelta::seconds(30)).is_some());
        assert!(cache.get_at("a", start + TimeDelta::seconds(61)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn set_expires_stale_entries_first() {
        let cache = EmbeddingCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            ..config(2, usize::MAX)
        });
        let start = Utc::now();
        cache.set_at("old", vec![1.0], "m", start);
        cache.set_at("fresh", vec![1.0], "m", start + TimeDelta::seconds(50));
        cache.set_at("new", vec![1.0], "m", start + TimeDelta::seconds(90));
        let stats = cache.stats();
        assert_eq!((stats.expirations, stats.evictions), (1, 0));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn delete_and_clear() {
        let cache = EmbeddingCache::new(CacheConfig::default());
        cache.set("a", vec![1.0], "m");
        cache.set("b", vec![1.0], "m");
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn snapshot_round_trip_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cfg = CacheConfig {
            ttl: Duration::from_secs(3600),
            persist_path: Some(path.clone()),
            ..CacheConfig::default()
        };

        let cache = EmbeddingCache::new(cfg.clone());
        let now = Utc::now();
        cache.set_at("live", vec![2.0], "m", now);
        cache.set_at("stale", vec![1.0], "m", now - TimeDelta::hours(2));
        assert_eq!(cache.len(), 2);
        cache.save().unwrap();

        let restored = EmbeddingCache::open(cfg).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get("live").unwrap().vector, vec![2.0]);
    }

    #[test]
    fn persist_on_mutation_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let cache = EmbeddingCache::new(CacheConfig {
            persist_path: Some(path.clone()),
            persist_on_mutation: true,
            ..CacheConfig::default()
        });
        cache.set("a", vec![1.0], "m");
        assert!(path.exists());
    }

    #[test]
    fn config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(config(0, 10).validate().is_err());
        assert!(config(10, 0).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let cache = Arc::new(EmbeddingCache::new(CacheConfig {
            cleanup_interval: Duration::from_secs(1),
            ..CacheConfig::default()
        }));
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(cancel.clone());
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    proptest! {
        #[test]
        fn bounds_hold_after_every_set(
            ops in prop::collection::vec((0u8..20, 0usize..40), 1..80),
            max_entries in 1usize..8,
            max_bytes in 64usize..1024,
        ) {
            let cache = EmbeddingCache::new(config(max_entries, max_bytes));
            for (key, dims) in ops {
                cache.set(&format!("h{key}"), vec![0.5; dims], "m");
                prop_assert!(cache.len() <= max_entries);
                prop_assert!(cache.total_bytes() <= max_bytes);
            }
        }

        #[test]
        fn expired_entries_never_returned(age in 0i64..200, ttl in 1u64..100) {
            let cache = EmbeddingCache::new(CacheConfig {
                ttl: Duration::from_secs(ttl),
                ..CacheConfig::default()
            });
            let start = Utc::now();
            cache.set_at("k", vec![1.0], "m", start);
            let got = cache.get_at("k", start + TimeDelta::seconds(age));
            prop_assert_eq!(got.is_some(), age <= i64::try_from(ttl).unwrap());
        }
    }
}
