//! Partitioned vector store keyed by (tenant, source)
//!
//! Every partition has its own lock, created on first use, so operations on
//! unrelated keys run in parallel while operations on the same key are
//! serialized. Loaded partitions live in a bounded LRU; since every `add` is
//! written through to disk before it returns, unloading a partition never
//! loses data.

use super::key::IndexKey;
use super::partition::{normalize, IndexPartition};
use super::persist::{self, PartitionFiles};
use super::ScoredHit;
use crate::error::{Result, SourcegateError};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Loaded state of one partition; `None` until first use or after eviction
type Slot = Arc<Mutex<Option<IndexPartition>>>;

/// Counters exposed for operators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStoreStats {
    /// Partitions currently held in memory, including any that were busy
    /// when the cache tried to unload them
    pub cached_partitions: usize,
    /// Search hits discarded because their row had no identifier
    pub dropped_hits: u64,
    /// Partitions unloaded to respect the cache capacity
    pub evictions: u64,
}

/// Owner of all partition state, on disk and in memory
pub struct IndexStore {
    root: PathBuf,
    slots: Mutex<HashMap<IndexKey, Slot>>,
    recency: Mutex<LruCache<IndexKey, ()>>,
    dropped_hits: AtomicU64,
    evictions: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IndexStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// # Arguments
    /// * `root` - Directory holding one subdirectory per tenant
    /// * `cache_capacity` - Maximum number of partitions kept in memory
    pub fn open(root: impl Into<PathBuf>, cache_capacity: usize) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| SourcegateError::Io {
            source: e,
            context: format!("Failed to create index directory: {}", root.display()),
        })?;

        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);

        tracing::info!(
            "Index store at {} (cache capacity {})",
            root.display(),
            capacity
        );

        Ok(Self {
            root,
            slots: Mutex::new(HashMap::new()),
            recency: Mutex::new(LruCache::new(capacity)),
            dropped_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append vectors and their chunk ids to the `(tenant_id, source_key)` partition.
    ///
    /// Vectors are normalized before storage. The partition is durably written
    /// before this returns; if that write fails the in-memory append is undone.
    ///
    /// # Errors
    /// * `DimensionMismatch` - a vector's length differs from the partition's
    ///   (or from the rest of the batch)
    /// * `InvalidBatch` - lengths of `vectors` and `chunk_ids` differ, or a vector is empty
    /// * `Io` - the durable write failed
    pub fn add(
        &self,
        tenant_id: &str,
        source_key: &str,
        vectors: &[Vec<f32>],
        chunk_ids: &[String],
    ) -> Result<()> {
        if vectors.is_empty() && chunk_ids.is_empty() {
            return Ok(());
        }

        let key = IndexKey::new(tenant_id, source_key);
        let files = PartitionFiles::new(&self.root, &key);

        self.with_partition(&key, |partition| {
            let mark = partition.append(vectors, chunk_ids)?;

            if let Err(e) = persist::save_partition(&files, partition) {
                partition.rollback(mark);
                tracing::error!("Failed to persist partition {}: {}", key, e);
                return Err(e);
            }

            tracing::debug!(
                "Added {} vectors to {} (now {})",
                vectors.len(),
                key,
                partition.vector_count()
            );
            Ok(())
        })
    }

    /// Search every listed source of a tenant.
    ///
    /// Returns up to `top_k_per_source` hits from each source, all merged and
    /// sorted by descending score (stable, so equal scores keep source order).
    /// No global truncation is applied. Sources that are empty, unknown, or
    /// hold vectors of another dimensionality contribute nothing.
    pub fn search<S: AsRef<str>>(
        &self,
        tenant_id: &str,
        source_keys: &[S],
        query: &[f32],
        top_k_per_source: usize,
    ) -> Vec<ScoredHit> {
        if query.is_empty() || top_k_per_source == 0 {
            return Vec::new();
        }

        let query = normalize(query);
        let mut hits = Vec::new();
        for source_key in source_keys {
            let key = IndexKey::new(tenant_id, source_key.as_ref());
            hits.extend(self.search_partition(&key, &query, top_k_per_source));
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits
    }

    fn search_partition(&self, key: &IndexKey, query: &[f32], k: usize) -> Vec<ScoredHit> {
        self.with_partition(key, |partition| {
            if partition.is_empty() {
                return Vec::new();
            }

            if partition.dimension() != Some(query.len()) {
                tracing::warn!(
                    "Skipping partition {}: holds {:?}-d vectors, query is {}-d",
                    key,
                    partition.dimension(),
                    query.len()
                );
                return Vec::new();
            }

            let ids = partition.ids();
            partition
                .top_k(query, k)
                .into_iter()
                .filter_map(|(row, score)| match ids.get(row) {
                    Some(chunk_id) => Some(ScoredHit {
                        chunk_id: chunk_id.clone(),
                        score,
                        source_key: key.source_key().to_string(),
                    }),
                    None => {
                        self.dropped_hits.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            "Dropping hit at row {} in {}: only {} ids are stored",
                            row,
                            key,
                            ids.len()
                        );
                        None
                    }
                })
                .collect()
        })
    }

    /// Number of vectors stored for a partition
    pub fn len(&self, tenant_id: &str, source_key: &str) -> usize {
        let key = IndexKey::new(tenant_id, source_key);
        self.with_partition(&key, |partition| partition.vector_count())
    }

    /// Dimensionality of a partition, if anything has been written to it
    pub fn dimension(&self, tenant_id: &str, source_key: &str) -> Option<usize> {
        let key = IndexKey::new(tenant_id, source_key);
        self.with_partition(&key, |partition| partition.dimension())
    }

    pub fn stats(&self) -> IndexStoreStats {
        IndexStoreStats {
            cached_partitions: self.loaded_partitions(),
            dropped_hits: self.dropped_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn loaded_partitions(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(loaded) => loaded.is_some(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
                // Held by an operation, so it is loaded
                Err(TryLockError::WouldBlock) => true,
            })
            .count()
    }

    /// Run `f` with the partition for `key` locked, loading it first if needed
    fn with_partition<T>(&self, key: &IndexKey, f: impl FnOnce(&mut IndexPartition) -> T) -> T {
        let slot = self.slot(key);
        let result = {
            let mut loaded = lock(&slot);
            let partition = loaded.get_or_insert_with(|| {
                persist::load_partition(&PartitionFiles::new(&self.root, key), key)
            });
            f(partition)
        };
        self.touch(key);
        result
    }

    fn slot(&self, key: &IndexKey) -> Slot {
        let mut slots = lock(&self.slots);
        slots.entry(key.clone()).or_default().clone()
    }

    /// Mark `key` as most recently used and unload whatever falls off the end
    fn touch(&self, key: &IndexKey) {
        let evicted = {
            let mut recency = lock(&self.recency);
            match recency.push(key.clone(), ()) {
                Some((old, _)) if &old != key => Some(old),
                _ => None,
            }
        };

        if let Some(old) = evicted {
            self.unload(&old);
        }
    }

    fn unload(&self, key: &IndexKey) {
        let Some(slot) = lock(&self.slots).get(key).cloned() else {
            return;
        };

        // A partition that is busy stays loaded; it re-enters the LRU on its next use
        let unloaded = match slot.try_lock() {
            Ok(mut loaded) => loaded.take().is_some(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take().is_some(),
            Err(TryLockError::WouldBlock) => false,
        };

        if unloaded {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Evicted partition {} from cache", key);
        }
    }
}
