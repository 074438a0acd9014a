//! Process-wide block cache keyed by content hash.
//!
//! Identical block content shared by unrelated files or fetched by unrelated
//! requests is transferred once. Bounded by entry count with strict LRU
//! eviction; nothing is persisted.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::index::BlockHash;

/// Fallback capacity when configured with zero entries.
const MIN_CAPACITY: NonZeroUsize = NonZeroUsize::MIN;

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub capacity: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub hit_rate: f64,
}

impl CacheStatistics {
    /// Fraction of lookups that were hits, 0.0 before any lookup.
    pub fn calculate_hit_rate(hit_count: u64, miss_count: u64) -> f64 {
        if hit_count + miss_count == 0 {
            0.0
        } else {
            (hit_count as f64) / ((hit_count + miss_count) as f64)
        }
    }
}

/// Bounded LRU map from block hash to block bytes.
///
/// Safe to share behind an `Arc` across any number of concurrent operations;
/// callers never lock anything themselves. `Bytes` values are reference
/// counted, so a hit does not copy block data.
pub struct BlockCache {
    blocks: Mutex<LruCache<BlockHash, Bytes>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl BlockCache {
    /// Creates a cache holding at most `config.max_entries` blocks.
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(MIN_CAPACITY);
        Self {
            blocks: Mutex::new(LruCache::new(capacity)),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
        }
    }

    /// Looks up a block, marking it most recently used.
    pub fn get(&self, hash: &BlockHash) -> Option<Bytes> {
        let found = self.blocks.lock().get(hash).cloned();

        match &found {
            Some(data) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Block cache hit for {} ({} bytes)", hash, data.len());
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Block cache miss for {}", hash);
            }
        }

        found
    }

    /// Stores a block; the last write for a hash wins.
    pub fn put(&self, hash: BlockHash, data: Bytes) {
        let size = data.len();
        let displaced = self.blocks.lock().push(hash.clone(), data);

        if let Some((displaced_hash, _)) = displaced
            && displaced_hash != hash
        {
            self.eviction_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Evicted block {} to make room", displaced_hash);
        }

        tracing::trace!("Cached block {} ({} bytes)", hash, size);
    }

    /// Drops every cached block.
    pub fn purge(&self) {
        let mut blocks = self.blocks.lock();
        let dropped = blocks.len();
        blocks.clear();
        tracing::info!("Purged block cache ({} entries)", dropped);
    }

    /// Whether a block is cached, without touching its recency.
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.lock().contains(hash)
    }

    /// Number of cached blocks.
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Whether the cache holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn statistics(&self) -> CacheStatistics {
        let (entries, capacity) = {
            let blocks = self.blocks.lock();
            (blocks.len(), blocks.cap().get())
        };
        let hit_count = self.hit_count.load(Ordering::Relaxed);
        let miss_count = self.miss_count.load(Ordering::Relaxed);

        CacheStatistics {
            entries,
            capacity,
            hit_count,
            miss_count,
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            hit_rate: CacheStatistics::calculate_hit_rate(hit_count, miss_count),
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
