//! `MnemoliteEngine` (spec §6): the single facade external callers use.
//! Owns the storage gateway, the embedding provider, the search caches
//! and the indexing pipeline, and dispatches every external operation to
//! the feature module that implements it. Lives in this crate rather
//! than `mnemolite-core` because it must call down into
//! `IndexingPipeline`, and `mnemolite-core` cannot depend back up on this
//! crate (see `mnemolite-core::lib` and DESIGN.md).

use crate::pipeline::{FileInput, IndexOptions, IndexingPipeline, Summary};
use mnemolite_core::config::EngineConfig;
use mnemolite_core::features::breaker::{BreakerRegistry, CircuitBreaker};
use mnemolite_core::features::cache::{self, CacheStats, CascadeCache, InvalidateScope};
use mnemolite_core::features::embedding::EmbeddingProvider;
use mnemolite_core::features::memory;
use mnemolite_core::features::search;
use mnemolite_storage::domain::{
    ChunkFilters, EmbeddingDomain, LexicalHit, Memory, MemoryListFilters, MemoryPatch, Node, Edge,
    RelationType, StorageGateway, VectorHit,
};
use mnemolite_storage::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// `SearchHybrid`'s response shape (spec §6): results plus the fusion
/// metadata a caller needs to explain ranking. Cached whole under the
/// `search:*` key scheme (spec §4.7), so it round-trips through
/// `CascadeCache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchResponse {
    pub hits: Vec<search::FusedHit>,
    pub lexical_active: bool,
    pub vector_active: bool,
}

#[derive(Debug, Serialize)]
pub struct GraphTraversalResult {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub circuit_breakers_open: Vec<String>,
    pub critical_circuits_open: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraverseDirection {
    Outbound,
    Inbound,
    Both,
}

pub struct MnemoliteEngine {
    gateway: Arc<dyn StorageGateway>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    pipeline: IndexingPipeline,
    chunk_cache: CascadeCache<Vec<u8>>,
    search_cache: CascadeCache<HybridSearchResponse>,
    breakers: BreakerRegistry,
    config: EngineConfig,
}

impl MnemoliteEngine {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Self {
        let breakers = BreakerRegistry::new();
        let embedding_breaker = Arc::new(CircuitBreaker::new(
            "embedding",
            config.breaker.failure_threshold,
            Duration::from_secs(config.breaker.recovery_timeout_s),
        ));
        breakers.register(embedding_breaker.clone());
        let cache_breaker = Arc::new(CircuitBreaker::new(
            "cache_l2",
            config.breaker.failure_threshold,
            Duration::from_secs(config.breaker.recovery_timeout_s),
        ));
        breakers.register(cache_breaker.clone());

        let chunk_cache = CascadeCache::new(
            config.cache.l1_max_bytes,
            Duration::from_secs(config.cache.l1_ttl_s),
            Duration::from_secs(config.cache.l2_ttl_s),
            cache::null_l2(),
            cache_breaker.clone(),
        );
        let search_cache = CascadeCache::new(
            config.cache.l1_max_bytes,
            Duration::from_secs(config.cache.l1_ttl_s),
            Duration::from_secs(config.cache.l2_ttl_s),
            cache::null_l2(),
            cache_breaker,
        );

        let pipeline_gateway = gateway.clone();
        let pipeline_embedding = embedding_provider.clone();
        let pipeline = IndexingPipeline::new(
            pipeline_gateway,
            Arc::new(move || pipeline_embedding.clone()),
        );

        Self {
            gateway,
            embedding_provider,
            pipeline,
            chunk_cache,
            search_cache,
            breakers,
            config,
        }
    }

    /// `IndexRepository(root, options)` (spec §6).
    pub async fn index_repository(
        &self,
        repository: &str,
        root: &Path,
        commit_hash: Option<String>,
        options: IndexOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Summary> {
        let summary = self
            .pipeline
            .index_repository(repository, root, commit_hash, &options, cancel)
            .await?;
        self.invalidate_repository_caches(repository).await?;
        Ok(summary)
    }

    /// `IndexFiles([{path,content,language?}], options)` (spec §6).
    pub async fn index_files(
        &self,
        repository: &str,
        files: Vec<FileInput>,
        commit_hash: Option<String>,
        options: IndexOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Summary> {
        let summary = self
            .pipeline
            .index_files(repository, files, commit_hash, &options, cancel)
            .await?;
        self.invalidate_repository_caches(repository).await?;
        Ok(summary)
    }

    /// `DeleteRepository(name)` (spec §6): graph rows first (FK order),
    /// then chunks, mirroring the pipeline's own cleanup phase.
    pub async fn delete_repository(&self, repository: &str) -> Result<()> {
        info!(repository, "deleting repository");
        self.gateway.delete_graph_for_repository(repository).await?;
        self.gateway.delete_by_repository(repository).await?;
        self.invalidate_repository_caches(repository).await
    }

    /// Reindexing or deleting a repository invalidates its chunk cache
    /// entries and, per spec §4.7, always clears `search:*` too (a stale
    /// fused result could otherwise rank a chunk that no longer exists).
    async fn invalidate_repository_caches(&self, repository: &str) -> Result<()> {
        self.chunk_cache
            .invalidate(InvalidateScope::Repository(repository))
            .await?;
        self.search_cache.invalidate(InvalidateScope::All).await
    }

    /// `SearchLexical(query, filters, limit)` (spec §6/§4.8).
    pub async fn search_lexical(
        &self,
        query: &str,
        filters: &ChunkFilters,
        threshold: Option<f32>,
        limit: usize,
    ) -> Result<Vec<LexicalHit>> {
        search::lexical(self.gateway.as_ref(), query, filters, threshold, limit).await
    }

    /// `SearchVector(vector, domain, filters, limit)` (spec §6/§4.9).
    pub async fn search_vector(
        &self,
        vector: &[f32],
        domain: EmbeddingDomain,
        filters: &ChunkFilters,
        ef_search: Option<u32>,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        search::vector(
            self.gateway.as_ref(),
            vector,
            domain,
            filters,
            ef_search,
            limit,
            self.config.embedding.dim,
        )
        .await
    }

    /// `SearchHybrid(query, filters, limit, offset, flags)` (spec §6):
    /// embeds the query text itself, fuses with RRF, optionally expands
    /// via the graph.
    pub async fn search_hybrid(
        &self,
        query: &str,
        filters: &ChunkFilters,
        limit: usize,
        expand_graph: bool,
        repository_for_expansion: Option<&str>,
    ) -> Result<HybridSearchResponse> {
        let cache_key = cache::search_key(&serde_json::to_string(&(
            query,
            filters,
            limit,
            expand_graph,
            repository_for_expansion,
        ))?);
        if let Some(cached) = self.search_cache.get(&cache_key).await? {
            return Ok(cached);
        }

        let embeddings = self
            .embedding_provider
            .embed(EmbeddingDomain::Text, std::slice::from_ref(&query.to_string()))
            .await
            .ok();
        let vector_query = embeddings
            .as_ref()
            .and_then(|v| v.first())
            .map(|v| (v.as_slice(), EmbeddingDomain::Text));

        let weights = search::FusionWeights {
            lexical: self.config.hybrid.lexical_weight,
            vector: self.config.hybrid.vector_weight,
        };
        let mut result = search::hybrid(
            self.gateway.as_ref(),
            query,
            vector_query,
            filters,
            weights,
            Some(self.config.hybrid.ef_search),
            limit,
            self.config.embedding.dim,
        )
        .await?;

        if expand_graph {
            if let Some(repository) = repository_for_expansion {
                search::expand_with_graph(self.gateway.as_ref(), repository, &mut result.hits).await?;
            }
        }

        let response = HybridSearchResponse {
            hits: result.hits,
            lexical_active: result.lexical_active,
            vector_active: result.vector_active,
        };
        self.search_cache.set(&cache_key, &response).await?;
        Ok(response)
    }

    /// `GraphTraverse(start_node_id, direction, relation?, max_depth<=10)` (spec §6).
    pub async fn graph_traverse(
        &self,
        start_node_id: Uuid,
        direction: TraverseDirection,
        relation: Option<RelationType>,
        max_depth: u32,
    ) -> Result<GraphTraversalResult> {
        let max_depth = max_depth.min(10);
        let mut visited_nodes: Vec<Node> = Vec::new();
        let mut visited_edges: Vec<Edge> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut frontier = vec![start_node_id];
        seen.insert(start_node_id);

        if let Some(node) = self.gateway.get_node(start_node_id).await? {
            visited_nodes.push(node);
        } else {
            return Err(EngineError::not_found(format!("node {start_node_id} not found")));
        }

        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();
            for node_id in frontier {
                let mut edges = Vec::new();
                if matches!(direction, TraverseDirection::Outbound | TraverseDirection::Both) {
                    edges.extend(self.gateway.get_outbound_edges(node_id).await?);
                }
                if matches!(direction, TraverseDirection::Inbound | TraverseDirection::Both) {
                    edges.extend(self.gateway.get_inbound_edges(node_id).await?);
                }
                for edge in edges {
                    if let Some(r) = relation {
                        if edge.relation_type != r {
                            continue;
                        }
                    }
                    let neighbor = if edge.source_node_id == node_id {
                        edge.target_node_id
                    } else {
                        edge.source_node_id
                    };
                    visited_edges.push(edge);
                    if seen.insert(neighbor) {
                        if let Some(node) = self.gateway.get_node(neighbor).await? {
                            visited_nodes.push(node);
                        }
                        next_frontier.push(neighbor);
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(GraphTraversalResult {
            nodes: visited_nodes,
            edges: visited_edges,
        })
    }

    /// `GraphFindPath(src, dst, relation?, max_depth<=20)` (spec §6):
    /// breadth-first shortest path over outbound edges.
    pub async fn graph_find_path(
        &self,
        source: Uuid,
        destination: Uuid,
        relation: Option<RelationType>,
        max_depth: u32,
    ) -> Result<Option<Vec<Uuid>>> {
        let max_depth = max_depth.min(20);
        if source == destination {
            return Ok(Some(vec![source]));
        }
        let mut queue = std::collections::VecDeque::new();
        let mut came_from = std::collections::HashMap::new();
        queue.push_back((source, 0u32));
        came_from.insert(source, source);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let edges = self.gateway.get_outbound_edges(current).await?;
            for edge in edges {
                if let Some(r) = relation {
                    if edge.relation_type != r {
                        continue;
                    }
                }
                let next = edge.target_node_id;
                if came_from.contains_key(&next) {
                    continue;
                }
                came_from.insert(next, current);
                if next == destination {
                    let mut path = vec![next];
                    let mut cursor = current;
                    while cursor != source {
                        path.push(cursor);
                        cursor = came_from[&cursor];
                    }
                    path.push(source);
                    path.reverse();
                    return Ok(Some(path));
                }
                queue.push_back((next, depth + 1));
            }
        }
        Ok(None)
    }

    pub async fn create_memory(&self, memory: &Memory) -> Result<Uuid> {
        memory::create(self.gateway.as_ref(), memory).await
    }

    pub async fn get_memory(&self, id: Uuid) -> Result<Option<Memory>> {
        memory::get(self.gateway.as_ref(), id).await
    }

    pub async fn update_memory(
        &self,
        id: Uuid,
        patch: &MemoryPatch,
        new_embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        memory::update(self.gateway.as_ref(), id, patch, new_embedding).await
    }

    pub async fn soft_delete_memory(&self, id: Uuid) -> Result<()> {
        memory::soft_delete(self.gateway.as_ref(), id).await
    }

    pub async fn delete_memory_permanently(&self, id: Uuid) -> Result<()> {
        memory::delete_permanently(self.gateway.as_ref(), id).await
    }

    pub async fn list_memories(
        &self,
        filters: &MemoryListFilters,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Memory>, u64)> {
        memory::list(self.gateway.as_ref(), filters, limit, offset).await
    }

    pub async fn search_memories_by_vector(
        &self,
        vector: &[f32],
        filters: &MemoryListFilters,
        limit: usize,
        distance_threshold: Option<f32>,
    ) -> Result<(Vec<Memory>, u64)> {
        memory::search_by_vector(
            self.gateway.as_ref(),
            vector,
            filters,
            limit,
            distance_threshold,
            self.config.embedding.dim,
        )
        .await
    }

    /// `FlushCache(scope, target?)` (spec §6): applies to both the chunk
    /// cache and the hybrid-search result cache, since a stale chunk and
    /// a stale fused search result are the same kind of staleness.
    pub async fn flush_cache(&self, scope: InvalidateScope<'_>) -> Result<()> {
        match scope {
            InvalidateScope::File { repository, file_path } => {
                self.chunk_cache
                    .invalidate(InvalidateScope::File { repository, file_path })
                    .await?;
                self.search_cache.invalidate(InvalidateScope::All).await
            }
            InvalidateScope::Repository(repository) => {
                self.invalidate_repository_caches(repository).await
            }
            InvalidateScope::All => {
                self.chunk_cache.invalidate(InvalidateScope::All).await?;
                self.search_cache.invalidate(InvalidateScope::All).await
            }
        }
    }

    /// `CacheStats()` (spec §6): the hybrid-search result cache's
    /// hit/miss counters, since that's the cache external callers observe
    /// through repeated `SearchHybrid` calls (spec §8 S4).
    pub fn cache_stats(&self) -> CacheStats {
        self.search_cache.stats()
    }

    /// `Health()` (spec §6): status is `healthy` with no breakers open,
    /// `degraded` with a non-critical breaker open, `critical` with a
    /// critical one (embedding or storage) open.
    pub fn health(&self) -> HealthReport {
        let open = self.breakers.critical_circuits_open();
        if !open.is_empty() {
            let critical = is_critical_breaker_set(&open);
            warn!(circuits = ?open, critical, "circuit breaker(s) open");
        }
        health_report_for(open)
    }
}

/// A critical breaker (embedding or storage) forces status to `critical`
/// regardless of what else is open.
fn is_critical_breaker_set(open: &[String]) -> bool {
    open.iter().any(|s| s == "embedding" || s == "storage")
}

fn health_report_for(open: Vec<String>) -> HealthReport {
    let critical = is_critical_breaker_set(&open);
    let status = if open.is_empty() {
        "healthy"
    } else if critical {
        "critical"
    } else {
        "degraded"
    };
    HealthReport {
        status: status.to_string(),
        circuit_breakers_open: open,
        critical_circuits_open: critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemolite_core::features::embedding::MockEmbeddingProvider;
    use mnemolite_storage::infrastructure::sqlite::SqliteGateway;

    fn engine() -> MnemoliteEngine {
        let gateway: Arc<dyn StorageGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(8));
        let mut config = EngineConfig::default();
        config.embedding.dim = 8;
        MnemoliteEngine::new(gateway, provider, config)
    }

    #[tokio::test]
    async fn index_then_hybrid_search_finds_the_chunk() {
        let engine = engine();
        let files = vec![FileInput {
            path: "a.py".to_string(),
            content: "def target():\n    return 42\n".to_string(),
            language: Some(mnemolite_storage::domain::Language::Python),
        }];
        engine
            .index_files("demo", files, None, IndexOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let response = engine
            .search_hybrid("target", &ChunkFilters::default(), 10, false, None)
            .await
            .unwrap();
        assert!(!response.hits.is_empty());
    }

    /// Spec §8 S4: a repeated `SearchHybrid` is an L1 hit; reindexing one
    /// file in the repository invalidates it so the next call misses again.
    #[tokio::test]
    async fn reindexing_invalidates_the_search_cache() {
        let engine = engine();
        let files = vec![FileInput {
            path: "a.py".to_string(),
            content: "def target():\n    return 42\n".to_string(),
            language: Some(mnemolite_storage::domain::Language::Python),
        }];
        engine
            .index_files("demo", files, None, IndexOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        engine
            .search_hybrid("target", &ChunkFilters::default(), 10, false, None)
            .await
            .unwrap();
        engine
            .search_hybrid("target", &ChunkFilters::default(), 10, false, None)
            .await
            .unwrap();
        let stats = engine.cache_stats();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l1_misses, 1);

        let files2 = vec![FileInput {
            path: "a.py".to_string(),
            content: "def target():\n    return 43\n".to_string(),
            language: Some(mnemolite_storage::domain::Language::Python),
        }];
        engine
            .index_files("demo", files2, None, IndexOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        engine
            .search_hybrid("target", &ChunkFilters::default(), 10, false, None)
            .await
            .unwrap();
        let stats = engine.cache_stats();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l1_misses, 2);
    }

    #[tokio::test]
    async fn health_is_healthy_with_no_failures() {
        let engine = engine();
        let report = engine.health();
        assert_eq!(report.status, "healthy");
        assert!(!report.critical_circuits_open);
    }

    #[test]
    fn health_is_degraded_when_only_a_non_critical_breaker_is_open() {
        let report = health_report_for(vec!["cache_l2".to_string()]);
        assert_eq!(report.status, "degraded");
        assert!(!report.critical_circuits_open);
    }

    #[test]
    fn health_is_critical_when_a_critical_breaker_is_open() {
        let report = health_report_for(vec!["cache_l2".to_string(), "embedding".to_string()]);
        assert_eq!(report.status, "critical");
        assert!(report.critical_circuits_open);
    }

    #[tokio::test]
    async fn graph_traverse_rejects_missing_node() {
        let engine = engine();
        let result = engine
            .graph_traverse(Uuid::new_v4(), TraverseDirection::Outbound, None, 3)
            .await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }
}
