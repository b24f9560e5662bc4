//! Embedding Provider (C4, spec §4.4).
//!
//! `EmbeddingProvider` is an opaque capability: `domain, texts -> vectors`.
//! Two implementations are shipped — a deterministic `MockEmbeddingProvider`
//! (used in tests and `embedding.mode = mock`) and a `RealEmbeddingProvider`
//! stub delegating to an injected async closure — plus a `CachedEmbeddingProvider`
//! decorator wrapping either one with a process-local LRU.

use async_trait::async_trait;
use lru::LruCache;
use mnemolite_storage::domain::EmbeddingDomain;
use mnemolite_storage::error::EngineError;
use mnemolite_storage::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;

/// `domain, texts -> vectors`. Implementations must be deterministic for a
/// given `(domain, text)`, batched in order, and never return NaN/Inf; a
/// zero-norm input returns the zero vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, domain: EmbeddingDomain, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Deterministic hash-based embedding: every distinct `(domain, text)` maps
/// to the same vector without calling out to any model. `embed` never
/// fails — suitable for `embedding.mode = mock` and unit tests.
pub struct MockEmbeddingProvider {
    dim: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn vector_for(&self, domain: EmbeddingDomain, text: &str) -> Vec<f32> {
        if text.trim().is_empty() {
            return vec![0.0; self.dim];
        }
        let tag = match domain {
            EmbeddingDomain::Text => "text",
            EmbeddingDomain::Code => "code",
        };
        let seed = blake3::hash(format!("{tag}:{text}").as_bytes());
        let bytes = seed.as_bytes();
        let mut v = Vec::with_capacity(self.dim);
        for i in 0..self.dim {
            let b = bytes[i % bytes.len()];
            // Map byte -> [-1, 1] so the vector has both signs, then
            // normalise to unit length (zero-norm already handled above).
            v.push((b as f32 / 127.5) - 1.0);
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, domain: EmbeddingDomain, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(domain, t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

type EmbedFn = dyn Fn(EmbeddingDomain, Vec<String>) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>>> + Send>>
    + Send
    + Sync;

/// Delegates to an injected async closure (an HTTP client to a real model
/// server, in production). Kept abstract per spec §4.4's "implementation-free
/// contract" — concrete model wiring is out of this engine's scope.
pub struct RealEmbeddingProvider {
    dim: usize,
    call: Arc<EmbedFn>,
}

impl RealEmbeddingProvider {
    pub fn new<F, Fut>(dim: usize, call: F) -> Self
    where
        F: Fn(EmbeddingDomain, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Vec<f32>>>> + Send + 'static,
    {
        Self {
            dim,
            call: Arc::new(move |d, t| Box::pin(call(d, t))),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RealEmbeddingProvider {
    async fn embed(&self, domain: EmbeddingDomain, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (self.call)(domain, texts.to_vec()).await
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

fn cache_key(domain: EmbeddingDomain, text: &str) -> String {
    let tag = match domain {
        EmbeddingDomain::Text => "text",
        EmbeddingDomain::Code => "code",
    };
    format!("{tag}:{}", blake3::hash(text.as_bytes()).to_hex())
}

/// Process-local LRU cache keyed `(domain, hash(text))` (spec §4.4), in
/// front of any `EmbeddingProvider`.
pub struct CachedEmbeddingProvider<P: EmbeddingProvider> {
    inner: P,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl<P: EmbeddingProvider> CachedEmbeddingProvider<P> {
    pub fn new(inner: P, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1 above");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbeddingProvider<P> {
    async fn embed(&self, domain: EmbeddingDomain, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses = Vec::new();
        {
            let mut cache = self.cache.lock();
            for (i, text) in texts.iter().enumerate() {
                let key = cache_key(domain, text);
                if let Some(v) = cache.get(&key) {
                    out[i] = Some(v.clone());
                } else {
                    misses.push(i);
                }
            }
        }
        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed(domain, &miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(EngineError::internal(
                    "embedding provider returned a mismatched vector count",
                ));
            }
            let mut cache = self.cache.lock();
            for (&i, vector) in misses.iter().zip(fresh.into_iter()) {
                let key = cache_key(domain, &texts[i]);
                cache.put(key, vector.clone());
                out[i] = Some(vector);
            }
        }
        Ok(out.into_iter().map(|v| v.expect("every slot filled above")).collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let p = MockEmbeddingProvider::new(8);
        let a = p.embed(EmbeddingDomain::Code, &["fn f() {}".to_string()]).await.unwrap();
        let b = p.embed(EmbeddingDomain::Code, &["fn f() {}".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }

    #[tokio::test]
    async fn mock_provider_zero_norm_for_blank_input() {
        let p = MockEmbeddingProvider::new(4);
        let v = p.embed(EmbeddingDomain::Text, &["   ".to_string()]).await.unwrap();
        assert_eq!(v[0], vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn domains_produce_different_vectors() {
        let p = MockEmbeddingProvider::new(8);
        let text = p.embed(EmbeddingDomain::Text, &["same".to_string()]).await.unwrap();
        let code = p.embed(EmbeddingDomain::Code, &["same".to_string()]).await.unwrap();
        assert_ne!(text, code);
    }

    #[tokio::test]
    async fn cache_serves_repeated_lookups_without_recomputing() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        let real = RealEmbeddingProvider::new(4, move |_domain, texts| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
            }
        });
        let cached = CachedEmbeddingProvider::new(real, 16);
        let _ = cached
            .embed(EmbeddingDomain::Text, &["hello".to_string()])
            .await
            .unwrap();
        let _ = cached
            .embed(EmbeddingDomain::Text, &["hello".to_string()])
            .await
            .unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
