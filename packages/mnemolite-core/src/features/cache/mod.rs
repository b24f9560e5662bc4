//! Cascade Cache (C7, spec §4.7): L1 (in-process LRU) + L2 (Redis) + L3
//! (authoritative storage, owned by the caller) behind a single
//! `Get`/`Set`/`Invalidate` interface.
//!
//! Follows a tiered-cache shape (fast-path check, promotion on hit,
//! background-free write-through since write-back isn't required here),
//! collapsed to the three tiers this component needs.

mod keys;
mod l2;

pub use keys::{chunks_file_key, chunks_repo_key, memory_list_key, memory_search_key, search_key};

use crate::features::breaker::CircuitBreaker;
use l2::L2Cache;
use lru::LruCache;
use mnemolite_storage::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "redis-cache")]
pub use l2::RedisL2;

struct L1Entry {
    bytes: Vec<u8>,
    inserted_at: Instant,
}

/// Process-wide L1 tier: byte-budgeted LRU with a TTL.
struct L1Cache {
    entries: Mutex<LruCache<String, L1Entry>>,
    ttl: Duration,
    max_bytes: usize,
    bytes_used: AtomicUsize,
}

impl L1Cache {
    fn new(max_bytes: usize, ttl: Duration) -> Self {
        // Entry count is bounded only loosely here; the byte budget below
        // is the real limit (spec §4.7 says "size bound in bytes").
        let cap = NonZeroUsize::new(1_000_000).expect("nonzero literal");
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
            max_bytes,
            bytes_used: AtomicUsize::new(0),
        }
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            if let Some(entry) = entries.pop(key) {
                self.bytes_used.fetch_sub(entry.bytes.len(), Ordering::AcqRel);
            }
            return None;
        }
        entries.get(key).map(|e| e.bytes.clone())
    }

    fn set(&self, key: String, bytes: Vec<u8>) {
        let size = bytes.len();
        let mut entries = self.entries.lock();
        if let Some(old) = entries.put(
            key,
            L1Entry {
                bytes,
                inserted_at: Instant::now(),
            },
        ) {
            self.bytes_used.fetch_sub(old.bytes.len(), Ordering::AcqRel);
        }
        self.bytes_used.fetch_add(size, Ordering::AcqRel);
        while self.bytes_used.load(Ordering::Acquire) > self.max_bytes {
            match entries.pop_lru() {
                Some((_, evicted)) => {
                    self.bytes_used.fetch_sub(evicted.bytes.len(), Ordering::AcqRel);
                }
                None => break,
            }
        }
    }

    fn remove(&self, key: &str) {
        if let Some(entry) = self.entries.lock().pop(key) {
            self.bytes_used.fetch_sub(entry.bytes.len(), Ordering::AcqRel);
        }
    }

    /// Removes every key for which `matches` returns true. Used by the
    /// repository/file/pattern invalidation paths.
    fn remove_matching(&self, matches: impl Fn(&str) -> bool) {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, _)| matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            if let Some(entry) = entries.pop(&key) {
                self.bytes_used.fetch_sub(entry.bytes.len(), Ordering::AcqRel);
            }
        }
    }

    fn clear(&self) {
        self.entries.lock().clear();
        self.bytes_used.store(0, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub promotions: u64,
}

impl CacheStats {
    /// `H1 + (1-H1)*H2` (spec §4.7).
    pub fn effective_hit_rate(&self) -> f64 {
        let l1_total = self.l1_hits + self.l1_misses;
        if l1_total == 0 {
            return 0.0;
        }
        let h1 = self.l1_hits as f64 / l1_total as f64;
        let l2_total = self.l2_hits + self.l2_misses;
        let h2 = if l2_total == 0 {
            0.0
        } else {
            self.l2_hits as f64 / l2_total as f64
        };
        h1 + (1.0 - h1) * h2
    }
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    promotions: AtomicU64,
}

/// Invalidation scope (spec §4.7).
pub enum InvalidateScope<'a> {
    File { repository: &'a str, file_path: &'a str },
    Repository(&'a str),
    All,
}

/// L1 + L2 + (caller-owned) L3 cascade for one logical value type `T`.
pub struct CascadeCache<T> {
    l1: L1Cache,
    l1_ttl: Duration,
    l2_ttl: Duration,
    l2: Arc<dyn L2Cache>,
    breaker: Arc<CircuitBreaker>,
    counters: Counters,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> CascadeCache<T> {
    pub fn new(
        l1_max_bytes: usize,
        l1_ttl: Duration,
        l2_ttl: Duration,
        l2: Arc<dyn L2Cache>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            l1: L1Cache::new(l1_max_bytes, l1_ttl),
            l1_ttl,
            l2_ttl,
            l2,
            breaker,
            counters: Counters::default(),
            _marker: PhantomData,
        }
    }

    /// L1 -> L2 -> miss. On an L2 hit, promotes into L1 with `t1`.
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        if let Some(bytes) = self.l1.get(key) {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(decode(&bytes)?));
        }
        self.counters.l1_misses.fetch_add(1, Ordering::Relaxed);

        let l2 = self.l2.clone();
        let key_owned = key.to_string();
        let fetched = self
            .breaker
            .call(async move { l2.get(&key_owned).await })
            .await;
        match fetched {
            Ok(Some(bytes)) => {
                self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                self.l1.set(key.to_string(), bytes.clone());
                self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                Ok(Some(decode(&bytes)?))
            }
            Ok(None) => {
                self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) if e.is_degraded() => {
                // Breaker open or L2 timeout: degrade to L1<->L3, still correct.
                self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Populates L1 then L2, in that order (spec §4.7 Get path).
    pub async fn set(&self, key: &str, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        self.l1.set(key.to_string(), bytes.clone());
        let l2 = self.l2.clone();
        let key_owned = key.to_string();
        let ttl = self.l2_ttl;
        let result = self
            .breaker
            .call(async move { l2.set(&key_owned, &bytes, ttl).await })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_degraded() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `Invalidate` (spec §4.7): always clears `search:*` too.
    pub async fn invalidate(&self, scope: InvalidateScope<'_>) -> Result<()> {
        match scope {
            InvalidateScope::File { repository, file_path } => {
                let needle = format!("file:{repository}:{file_path}");
                self.l1.remove_matching(|k| k.contains(&needle));
                self.l1.remove_matching(|k| k.starts_with("search:"));
                self.l2_invalidate(&format!("*{needle}*")).await?;
                self.l2_invalidate("search:*").await?;
            }
            InvalidateScope::Repository(repository) => {
                self.l1.remove_matching(|k| k.contains(repository));
                self.l1.remove_matching(|k| k.starts_with("search:"));
                self.l2_invalidate(&format!("*{repository}*")).await?;
                self.l2_invalidate("search:*").await?;
            }
            InvalidateScope::All => {
                self.l1.clear();
                self.l2_invalidate("*").await?;
            }
        }
        Ok(())
    }

    async fn l2_invalidate(&self, pattern: &str) -> Result<()> {
        let l2 = self.l2.clone();
        let pattern = pattern.to_string();
        let result = self
            .breaker
            .call(async move {
                if pattern == "*" {
                    l2.flush().await
                } else {
                    l2.delete_pattern(&pattern).await
                }
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_degraded() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.counters.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.counters.l2_misses.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
        }
    }

    /// Removes one key from L1/L2 without touching the rest (used by the
    /// direct `remove` path some callers prefer over full invalidation).
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.l1.remove(key);
        self.l2_invalidate(key).await
    }

    pub fn l1_ttl(&self) -> Duration {
        self.l1_ttl
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Builds a cache with no L2 backend (spec §4.7's degraded mode), useful
/// for tests and deployments without Redis.
pub fn null_l2() -> Arc<dyn L2Cache> {
    Arc::new(l2::NullL2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache() -> CascadeCache<String> {
        CascadeCache::new(
            1_000_000,
            Duration::from_secs(300),
            Duration::from_secs(3600),
            null_l2(),
            Arc::new(CircuitBreaker::new("l2_cache", 5, Duration::from_secs(30))),
        )
    }

    #[tokio::test]
    async fn set_then_get_hits_l1() {
        let cache = cache();
        cache.set("chunks:repo:demo", &"hello".to_string()).await.unwrap();
        let got = cache.get("chunks:repo:demo").await.unwrap();
        assert_eq!(got, Some("hello".to_string()));
        assert_eq!(cache.stats().l1_hits, 1);
    }

    #[tokio::test]
    async fn invalidate_repository_clears_matching_and_search_keys() {
        let cache = cache();
        cache.set("chunks:repo:demo", &"x".to_string()).await.unwrap();
        cache.set("search:v1:abc", &"y".to_string()).await.unwrap();
        cache.set("chunks:repo:other", &"z".to_string()).await.unwrap();
        cache
            .invalidate(InvalidateScope::Repository("demo"))
            .await
            .unwrap();
        assert_eq!(cache.get("chunks:repo:demo").await.unwrap(), None);
        assert_eq!(cache.get("search:v1:abc").await.unwrap(), None);
        assert_eq!(cache.get("chunks:repo:other").await.unwrap(), Some("z".to_string()));
    }

    #[tokio::test]
    async fn invalidate_all_flushes_everything() {
        let cache = cache();
        cache.set("chunks:repo:demo", &"x".to_string()).await.unwrap();
        cache.invalidate(InvalidateScope::All).await.unwrap();
        assert_eq!(cache.get("chunks:repo:demo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn l1_respects_ttl() {
        let cache = CascadeCache::<String>::new(
            1_000_000,
            Duration::from_millis(5),
            Duration::from_secs(3600),
            null_l2(),
            Arc::new(CircuitBreaker::new("l2_cache", 5, Duration::from_secs(30))),
        );
        cache.set("k", &"v".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
