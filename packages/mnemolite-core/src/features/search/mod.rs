//! Lexical Search (C8), Vector Search (C9) and RRF Fusion (C10), spec
//! §4.8-§4.10. Each call that reaches the gateway runs under the
//! Timeout/Breaker Kernel (C12, `features::breaker::with_timeout`).

use crate::features::breaker::with_timeout;
use mnemolite_storage::domain::{
    ChunkFilters, EmbeddingDomain, LexicalHit, StorageGateway, VectorHit,
};
use mnemolite_storage::error::EngineError;
use mnemolite_storage::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

const LEXICAL_TIMEOUT: Duration = Duration::from_secs(5);
const VECTOR_TIMEOUT: Duration = Duration::from_secs(5);
const HYBRID_TIMEOUT: Duration = Duration::from_secs(10);
const GRAPH_TRAVERSAL_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_LEXICAL_THRESHOLD: f32 = 0.1;
const DEFAULT_EF_SEARCH: u32 = 100;
const MIN_EF_SEARCH: u32 = 10;
const MAX_EF_SEARCH: u32 = 1000;
const RRF_K: f64 = 60.0;
const GRAPH_EXPANSION_LIMIT: usize = 5;

/// `query -> ranked chunks` (spec §4.8). Empty query is rejected.
pub async fn lexical(
    gateway: &dyn StorageGateway,
    query: &str,
    filters: &ChunkFilters,
    threshold: Option<f32>,
    limit: usize,
) -> Result<Vec<LexicalHit>> {
    if query.trim().is_empty() {
        return Err(EngineError::invalid_argument("lexical search query must not be empty"));
    }
    let threshold = threshold.unwrap_or(DEFAULT_LEXICAL_THRESHOLD);
    with_timeout(
        "lexical_search",
        LEXICAL_TIMEOUT,
        gateway.trigram_search(query, filters, threshold, limit),
    )
    .await
}

/// `vector -> ranked chunks` (spec §4.9). `expected_dim` is the
/// process-wide embedding dimension `d`; a mismatch is rejected before the
/// call reaches the store.
pub async fn vector(
    gateway: &dyn StorageGateway,
    vector: &[f32],
    domain: EmbeddingDomain,
    filters: &ChunkFilters,
    ef_search: Option<u32>,
    limit: usize,
    expected_dim: usize,
) -> Result<Vec<VectorHit>> {
    if vector.len() != expected_dim {
        return Err(EngineError::invalid_argument(format!(
            "vector search expected dimension {expected_dim}, got {}",
            vector.len()
        )));
    }
    let ef_search = ef_search.unwrap_or(DEFAULT_EF_SEARCH).clamp(MIN_EF_SEARCH, MAX_EF_SEARCH);
    with_timeout(
        "vector_search",
        VECTOR_TIMEOUT,
        gateway.vector_search(vector, domain, filters, ef_search, limit),
    )
    .await
}

/// Both embedding domains concurrently (spec §4.9 `SearchBoth`).
pub async fn search_both(
    gateway: &dyn StorageGateway,
    text_vector: &[f32],
    code_vector: &[f32],
    filters: &ChunkFilters,
    ef_search: Option<u32>,
    limit_per_domain: usize,
    expected_dim: usize,
) -> Result<(Vec<VectorHit>, Vec<VectorHit>)> {
    tokio::try_join!(
        vector(gateway, text_vector, EmbeddingDomain::Text, filters, ef_search, limit_per_domain, expected_dim),
        vector(gateway, code_vector, EmbeddingDomain::Code, filters, ef_search, limit_per_domain, expected_dim),
    )
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contribution {
    pub lexical: Option<f64>,
    pub vector: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedHit {
    pub chunk_id: Uuid,
    pub score: f64,
    pub contribution: Contribution,
    pub lexical_score: Option<f32>,
    pub vector_distance: Option<f32>,
    pub related: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { lexical: 0.4, vector: 0.6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    pub hits: Vec<FusedHit>,
    pub lexical_active: bool,
    pub vector_active: bool,
}

/// Hybrid search: runs lexical and vector search concurrently under one
/// timeout (spec §5's "barrier"), then fuses with RRF (spec §4.10). Either
/// list may be empty (e.g. embedding unavailable) without failing the call.
pub async fn hybrid(
    gateway: &dyn StorageGateway,
    query: &str,
    vector_query: Option<(&[f32], EmbeddingDomain)>,
    filters: &ChunkFilters,
    weights: FusionWeights,
    ef_search: Option<u32>,
    limit: usize,
    expected_dim: usize,
) -> Result<FusionResult> {
    with_timeout("hybrid_search", HYBRID_TIMEOUT, async {
        let lexical_fut = lexical(gateway, query, filters, None, limit);
        let lexical_hits = match vector_query {
            Some((vec, domain)) => {
                let vector_fut = vector(gateway, vec, domain, filters, ef_search, limit, expected_dim);
                let (l, v) = tokio::join!(lexical_fut, vector_fut);
                return Ok(fuse(&l?, &v?, weights, limit));
            }
            None => lexical_fut.await?,
        };
        Ok(fuse(&lexical_hits, &[], weights, limit))
    })
    .await
}

/// RRF fusion (spec §4.10): `score = Σ w_X / (k + r)` per list, summed
/// per chunk, sorted descending. Ties: higher lexical_score, then lower
/// vector_distance, then lexicographically smaller chunk_id.
pub fn fuse(lexical: &[LexicalHit], vector: &[VectorHit], weights: FusionWeights, top_k: usize) -> FusionResult {
    struct Row {
        lexical_score: Option<f32>,
        vector_distance: Option<f32>,
        lexical_contrib: Option<f64>,
        vector_contrib: Option<f64>,
    }

    let mut rows: HashMap<Uuid, Row> = HashMap::new();
    for hit in lexical {
        let entry = rows.entry(hit.chunk_id).or_insert(Row {
            lexical_score: None,
            vector_distance: None,
            lexical_contrib: None,
            vector_contrib: None,
        });
        entry.lexical_score = Some(hit.score);
        entry.lexical_contrib = Some(weights.lexical / (RRF_K + hit.rank as f64));
    }
    for hit in vector {
        let entry = rows.entry(hit.chunk_id).or_insert(Row {
            lexical_score: None,
            vector_distance: None,
            lexical_contrib: None,
            vector_contrib: None,
        });
        entry.vector_distance = Some(hit.distance);
        entry.vector_contrib = Some(weights.vector / (RRF_K + hit.rank as f64));
    }

    let mut hits: Vec<FusedHit> = rows
        .into_iter()
        .map(|(chunk_id, row)| FusedHit {
            chunk_id,
            score: row.lexical_contrib.unwrap_or(0.0) + row.vector_contrib.unwrap_or(0.0),
            contribution: Contribution {
                lexical: row.lexical_contrib,
                vector: row.vector_contrib,
            },
            lexical_score: row.lexical_score,
            vector_distance: row.vector_distance,
            related: Vec::new(),
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.lexical_score
                    .unwrap_or(f32::NEG_INFINITY)
                    .partial_cmp(&a.lexical_score.unwrap_or(f32::NEG_INFINITY))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                a.vector_distance
                    .unwrap_or(f32::INFINITY)
                    .partial_cmp(&b.vector_distance.unwrap_or(f32::INFINITY))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k);

    FusionResult {
        hits,
        lexical_active: !lexical.is_empty(),
        vector_active: !vector.is_empty(),
    }
}

/// Optional graph expansion (spec §4.10): for each top-K chunk, follow
/// `calls`/`imports` edges to depth 1, bounded at `GRAPH_EXPANSION_LIMIT`
/// related chunks. Does not alter the fused ranking.
pub async fn expand_with_graph(
    gateway: &dyn StorageGateway,
    repository: &str,
    hits: &mut [FusedHit],
) -> Result<()> {
    with_timeout("graph_expansion", GRAPH_TRAVERSAL_TIMEOUT, async {
        let nodes = gateway.get_nodes(repository).await?;
        let edges = gateway.get_edges(repository).await?;

        let mut node_to_chunk: HashMap<Uuid, Uuid> = HashMap::new();
        let mut chunk_to_node: HashMap<Uuid, Uuid> = HashMap::new();
        for node in &nodes {
            if let Some(chunk_id) = node.chunk_id() {
                node_to_chunk.insert(node.id, chunk_id);
                chunk_to_node.insert(chunk_id, node.id);
            }
        }

        let mut outbound: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for edge in edges.iter().filter(|e| {
            matches!(
                e.relation_type,
                mnemolite_storage::domain::RelationType::Calls | mnemolite_storage::domain::RelationType::Imports
            )
        }) {
            outbound.entry(edge.source_node_id).or_default().push(edge.target_node_id);
        }

        for hit in hits.iter_mut() {
            let Some(&node_id) = chunk_to_node.get(&hit.chunk_id) else { continue };
            let mut related = Vec::new();
            let mut seen: HashSet<Uuid> = HashSet::new();
            for &target in outbound.get(&node_id).into_iter().flatten() {
                if let Some(&chunk_id) = node_to_chunk.get(&target) {
                    if chunk_id != hit.chunk_id && seen.insert(chunk_id) {
                        related.push(chunk_id);
                        if related.len() >= GRAPH_EXPANSION_LIMIT {
                            break;
                        }
                    }
                }
            }
            hit.related = related;
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(chunk_id: Uuid, score: f32, rank: u32) -> LexicalHit {
        LexicalHit { chunk_id, score, rank }
    }

    fn vec_hit(chunk_id: Uuid, distance: f32, rank: u32) -> VectorHit {
        VectorHit { chunk_id, distance, rank }
    }

    #[test]
    fn chunk_in_both_lists_outranks_single_list() {
        let shared = Uuid::new_v4();
        let lexical_only = Uuid::new_v4();
        let l = vec![lex(shared, 0.9, 1), lex(lexical_only, 0.8, 2)];
        let v = vec![vec_hit(shared, 0.1, 1)];
        let result = fuse(&l, &v, FusionWeights::default(), 10);
        assert_eq!(result.hits[0].chunk_id, shared);
    }

    #[test]
    fn ties_break_by_chunk_id() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let l = vec![lex(a, 0.5, 1), lex(b, 0.5, 1)];
        let result = fuse(&l, &[], FusionWeights::default(), 10);
        assert_eq!(result.hits[0].chunk_id, a);
        assert_eq!(result.hits[1].chunk_id, b);
    }

    #[test]
    fn vector_only_list_still_ranks() {
        let id = Uuid::new_v4();
        let v = vec![vec_hit(id, 0.2, 1)];
        let result = fuse(&[], &v, FusionWeights::default(), 10);
        assert!(!result.lexical_active);
        assert!(result.vector_active);
        assert_eq!(result.hits.len(), 1);
    }

    #[test]
    fn top_k_truncates() {
        let l: Vec<_> = (0..20).map(|i| lex(Uuid::new_v4(), 0.5, i + 1)).collect();
        let result = fuse(&l, &[], FusionWeights::default(), 5);
        assert_eq!(result.hits.len(), 5);
    }
}
