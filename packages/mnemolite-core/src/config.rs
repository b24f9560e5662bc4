//! Engine configuration (spec §6 "Configuration"). One struct, nested by
//! component, with the defaults this system requires; every field is a
//! plain value rather than an env/file loader (see DESIGN.md).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    Real,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub dim: usize,
    pub mode: EmbeddingMode,
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dim: mnemolite_storage::DEFAULT_EMBEDDING_DIM,
            mode: EmbeddingMode::Mock,
            cache_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        let workers = 4;
        Self {
            workers,
            queue_capacity: workers * 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub l1_max_bytes: usize,
    pub l1_ttl_s: u64,
    pub l2_url: Option<String>,
    pub l2_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_bytes: 100 * 1024 * 1024,
            l1_ttl_s: 300,
            l2_url: None,
            l2_ttl_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_s: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_s: 30,
        }
    }
}

/// Per-operation deadlines (spec §4.12).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub ast_parse_s: u64,
    pub embedding_single_s: u64,
    pub embedding_batch_s: u64,
    pub graph_construction_s: u64,
    pub graph_traversal_s: u64,
    pub index_file_s: u64,
    pub lexical_search_s: u64,
    pub vector_search_s: u64,
    pub hybrid_search_s: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ast_parse_s: 10,
            embedding_single_s: 5,
            embedding_batch_s: 30,
            graph_construction_s: 300,
            graph_traversal_s: 10,
            index_file_s: 60,
            lexical_search_s: 5,
            vector_search_s: 5,
            hybrid_search_s: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn hybrid_search(&self) -> Duration {
        Duration::from_secs(self.hybrid_search_s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridConfig {
    pub lexical_weight: f64,
    pub vector_weight: f64,
    pub rrf_k: f64,
    pub ef_search: u32,
    pub lexical_similarity_threshold: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.4,
            vector_weight: 0.6,
            rrf_k: 60.0,
            ef_search: 100,
            lexical_similarity_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub timeouts: TimeoutConfig,
    pub hybrid: HybridConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.embedding.dim, 768);
        assert_eq!(cfg.indexing.workers, 4);
        assert_eq!(cfg.indexing.queue_capacity, 16);
        assert_eq!(cfg.cache.l1_max_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.breaker.recovery_timeout_s, 30);
        assert_eq!(cfg.hybrid.lexical_weight, 0.4);
        assert_eq!(cfg.hybrid.vector_weight, 0.6);
        assert_eq!(cfg.hybrid.rrf_k, 60.0);
        assert_eq!(cfg.hybrid.ef_search, 100);
        assert_eq!(cfg.hybrid.lexical_similarity_threshold, 0.1);
    }
}
