//! Scoring result cache.
//!
//! Fixed-size LRU keyed by `(chunk_id, query_hash, context_epoch)` with a
//! TTL. A hit skips feature evaluation entirely. Concurrent lookups of the
//! same key may both miss and compute; the duplicate write is harmless.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::FeatureScore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub chunk_id: String,
    pub query_hash: String,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
struct CachedScore {
    total: f64,
    features: Vec<FeatureScore>,
    inserted_at: Instant,
}

pub struct ScoreCache {
    inner: Mutex<LruCache<CacheKey, CachedScore>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ScoreCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<(f64, Vec<FeatureScore>)> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some((entry.total, entry.features.clone()))
            }
            Some(_) => {
                cache.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, total: f64, features: Vec<FeatureScore>) {
        self.inner.lock().put(
            key,
            CachedScore { total, features, inserted_at: Instant::now() },
        );
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hit_count() as f64;
        let total = hits + self.miss_count() as f64;
        if total == 0.0 { 0.0 } else { hits / total }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
