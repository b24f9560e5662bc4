//! Graph Builder (C5, spec §4.5). Builds an arena of nodes/edges in memory
//! per repository, realized directly over `Vec`/`HashMap` keyed by the
//! final `Uuid`s rather than a separate integer-index layer, since these
//! repositories are chunk-sized rather than whole-codebase-AST-sized, then
//! hands the caller flat `Node`/`Edge` lists plus per-node `ComputedMetrics`
//! to persist via `StorageGateway::write_graph_batch`.

use mnemolite_storage::domain::{Chunk, ChunkType, ComputedMetrics, Edge, Node, NodeType, RelationType};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_TOLERANCE: f64 = 1e-6;
const PAGERANK_MAX_ITER: usize = 100;

pub struct GraphBuildResult {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub metrics: HashMap<Uuid, ComputedMetrics>,
}

/// `(chunks, metadata) -> (nodes, edges, metrics)` (spec §4.5).
pub fn build(repository: &str, chunks: &[Chunk]) -> GraphBuildResult {
    let now = chrono::Utc::now();
    let mut nodes = Vec::new();
    let mut chunk_node_id: HashMap<Uuid, Uuid> = HashMap::new();

    // Step 1: one node per chunk (fallback blocks aren't semantic
    // declarations and are excluded, matching "Function/Method/Class/Module").
    for chunk in chunks.iter().filter(|c| c.chunk_type != ChunkType::FallbackBlock) {
        let node_type = match chunk.chunk_type {
            ChunkType::Function => NodeType::Function,
            ChunkType::Method => NodeType::Method,
            ChunkType::Class | ChunkType::Interface => NodeType::Class,
            ChunkType::Module | ChunkType::FallbackBlock => NodeType::Module,
        };
        let id = Uuid::new_v4();
        chunk_node_id.insert(chunk.id, id);
        nodes.push(Node {
            id,
            node_type,
            label: chunk.name.clone().unwrap_or_else(|| chunk.name_path.clone()),
            properties: json!({
                "repository": repository,
                "file_path": chunk.file_path,
                "chunk_id": chunk.id,
                "name_path": chunk.name_path,
            }),
            created_at: now,
        });
    }

    // One synthetic Module node per file, to anchor "contains" edges to its
    // top-level declarations (spec §4.5 step 4).
    let mut module_node_id: HashMap<String, Uuid> = HashMap::new();
    for file_path in chunks.iter().map(|c| c.file_path.clone()).collect::<std::collections::HashSet<_>>() {
        let id = Uuid::new_v4();
        module_node_id.insert(file_path.clone(), id);
        nodes.push(Node {
            id,
            node_type: NodeType::Module,
            label: file_path.clone(),
            properties: json!({"repository": repository, "file_path": file_path}),
            created_at: now,
        });
    }

    // Step 2: symbol table. Conflicts resolved by preferring exact
    // name_path, then same-file, then first-seen.
    let mut by_name_path: HashMap<String, Uuid> = HashMap::new();
    let mut by_name: HashMap<String, Vec<(String, Uuid)>> = HashMap::new(); // name -> [(file_path, node_id)]
    for chunk in chunks.iter().filter(|c| c.chunk_type != ChunkType::FallbackBlock) {
        let Some(&node_id) = chunk_node_id.get(&chunk.id) else { continue };
        by_name_path.entry(chunk.name_path.clone()).or_insert(node_id);
        if let Some(name) = &chunk.name {
            by_name.entry(name.clone()).or_default().push((chunk.file_path.clone(), node_id));
        }
    }

    let resolve = |name: &str, file_path: &str| -> Option<Uuid> {
        if let Some(&id) = by_name_path.get(name) {
            return Some(id);
        }
        let candidates = by_name.get(name)?;
        candidates
            .iter()
            .find(|(f, _)| f == file_path)
            .or_else(|| candidates.first())
            .map(|(_, id)| *id)
    };

    // Step 3: calls/imports edges, with External-node synthesis on miss.
    let mut external_by_label: HashMap<String, Uuid> = HashMap::new();
    let mut edges = Vec::new();
    let mut seen_edges: std::collections::HashSet<(Uuid, Uuid, RelationType)> = std::collections::HashSet::new();

    let mut push_edge = |edges: &mut Vec<Edge>, seen: &mut std::collections::HashSet<(Uuid, Uuid, RelationType)>, source: Uuid, target: Uuid, relation_type: RelationType, properties: serde_json::Value| {
        let key = (source, target, relation_type);
        if seen.insert(key) {
            edges.push(Edge {
                id: Uuid::new_v4(),
                source_node_id: source,
                target_node_id: target,
                relation_type,
                properties,
                created_at: now,
            });
        }
    };

    for chunk in chunks.iter().filter(|c| c.chunk_type != ChunkType::FallbackBlock) {
        let Some(&source_id) = chunk_node_id.get(&chunk.id) else { continue };

        if let Some(calls) = chunk.metadata.get("calls").and_then(|v| v.as_array()) {
            for call in calls {
                let Some(callee) = call.get("callee_name").and_then(|v| v.as_str()) else { continue };
                let simple_name = callee.rsplit('.').next().unwrap_or(callee);
                let target_id = resolve(callee, &chunk.file_path)
                    .or_else(|| resolve(simple_name, &chunk.file_path))
                    .unwrap_or_else(|| {
                        *external_by_label.entry(callee.to_string()).or_insert_with(|| {
                            let id = Uuid::new_v4();
                            nodes.push(Node {
                                id,
                                node_type: NodeType::External,
                                label: callee.to_string(),
                                properties: json!({"repository": repository}),
                                created_at: now,
                            });
                            id
                        })
                    });
                push_edge(&mut edges, &mut seen_edges, source_id, target_id, RelationType::Calls, json!({"line": call.get("line")}));
            }
        }

        if let Some(imports) = chunk.metadata.get("imports").and_then(|v| v.as_array()) {
            for import in imports {
                let Some(module) = import.get("module").and_then(|v| v.as_str()) else { continue };
                let target_id = resolve(module, &chunk.file_path).unwrap_or_else(|| {
                    *external_by_label.entry(module.to_string()).or_insert_with(|| {
                        let id = Uuid::new_v4();
                        nodes.push(Node {
                            id,
                            node_type: NodeType::External,
                            label: module.to_string(),
                            properties: json!({"repository": repository}),
                            created_at: now,
                        });
                        id
                    })
                });
                push_edge(&mut edges, &mut seen_edges, source_id, target_id, RelationType::Imports, json!({}));
            }
        }
    }

    // Step 4: contains edges. Module -> its top-level Function/Class/Interface;
    // Class -> its Method children (matched by dotted name_path prefix).
    let mut class_by_name_path: HashMap<String, Uuid> = HashMap::new();
    for chunk in chunks.iter().filter(|c| matches!(c.chunk_type, ChunkType::Class | ChunkType::Interface)) {
        if let Some(&id) = chunk_node_id.get(&chunk.id) {
            class_by_name_path.insert(chunk.name_path.clone(), id);
        }
    }
    for chunk in chunks.iter().filter(|c| c.chunk_type != ChunkType::FallbackBlock) {
        let Some(&node_id) = chunk_node_id.get(&chunk.id) else { continue };
        match chunk.chunk_type {
            ChunkType::Function | ChunkType::Class | ChunkType::Interface => {
                if let Some(&module_id) = module_node_id.get(&chunk.file_path) {
                    push_edge(&mut edges, &mut seen_edges, module_id, node_id, RelationType::Contains, json!({}));
                }
            }
            ChunkType::Method => {
                if let Some(class_name) = chunk.name_path.rsplit_once('.').map(|(c, _)| c) {
                    if let Some(&class_id) = class_by_name_path.get(class_name) {
                        push_edge(&mut edges, &mut seen_edges, class_id, node_id, RelationType::Contains, json!({}));
                    }
                }
            }
            ChunkType::Module | ChunkType::FallbackBlock => {}
        }
    }

    let metrics = compute_metrics(&nodes, &edges);

    tracing::info!(
        repository,
        nodes = nodes.len(),
        edges = edges.len(),
        "graph built"
    );

    GraphBuildResult { nodes, edges, metrics }
}

/// Post-pass (spec §4.5): efferent/afferent coupling over all edges, plus
/// PageRank over the `calls`-only subgraph (damping 0.85, tol 1e-6, max
/// 100 iterations, uniform seed).
fn compute_metrics(nodes: &[Node], edges: &[Edge]) -> HashMap<Uuid, ComputedMetrics> {
    let mut out_degree: HashMap<Uuid, u32> = HashMap::new();
    let mut in_degree: HashMap<Uuid, u32> = HashMap::new();
    for edge in edges {
        *out_degree.entry(edge.source_node_id).or_insert(0) += 1;
        *in_degree.entry(edge.target_node_id).or_insert(0) += 1;
    }

    let calls_edges: Vec<(Uuid, Uuid)> = edges
        .iter()
        .filter(|e| e.relation_type == RelationType::Calls)
        .map(|e| (e.source_node_id, e.target_node_id))
        .collect();
    let ranks = pagerank(&nodes.iter().map(|n| n.id).collect::<Vec<_>>(), &calls_edges);

    nodes
        .iter()
        .map(|n| {
            (
                n.id,
                ComputedMetrics {
                    efferent_coupling: *out_degree.get(&n.id).unwrap_or(&0),
                    afferent_coupling: *in_degree.get(&n.id).unwrap_or(&0),
                    page_rank: *ranks.get(&n.id).unwrap_or(&0.0),
                },
            )
        })
        .collect()
}

fn pagerank(node_ids: &[Uuid], edges: &[(Uuid, Uuid)]) -> HashMap<Uuid, f64> {
    let n = node_ids.len();
    if n == 0 {
        return HashMap::new();
    }
    let uniform = 1.0 / n as f64;
    let mut rank: HashMap<Uuid, f64> = node_ids.iter().map(|&id| (id, uniform)).collect();

    let mut out_degree: HashMap<Uuid, usize> = HashMap::new();
    let mut inbound: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for &(src, dst) in edges {
        *out_degree.entry(src).or_insert(0) += 1;
        inbound.entry(dst).or_default().push(src);
    }

    for _ in 0..PAGERANK_MAX_ITER {
        let dangling_sum: f64 = node_ids
            .iter()
            .filter(|id| !out_degree.contains_key(*id))
            .map(|id| rank[id])
            .sum();

        let mut new_rank = HashMap::with_capacity(n);
        let mut delta = 0.0;
        for &id in node_ids {
            let contrib: f64 = inbound
                .get(&id)
                .map(|sources| {
                    sources
                        .iter()
                        .map(|src| rank[src] / out_degree[src] as f64)
                        .sum()
                })
                .unwrap_or(0.0);
            let value = (1.0 - PAGERANK_DAMPING) / n as f64
                + PAGERANK_DAMPING * (contrib + dangling_sum / n as f64);
            delta += (value - rank[&id]).abs();
            new_rank.insert(id, value);
        }
        rank = new_rank;
        if delta < PAGERANK_TOLERANCE {
            break;
        }
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::chunking::chunk_file;
    use mnemolite_storage::domain::Language;

    #[test]
    fn calls_resolve_within_repository() {
        let src = "def helper():\n    return 1\n\ndef main():\n    return helper()\n";
        let result = chunk_file("demo", "a.py", Language::Python, src, None);
        let graph = build("demo", &result.chunks);
        let calls: Vec<_> = graph.edges.iter().filter(|e| e.relation_type == RelationType::Calls).collect();
        assert_eq!(calls.len(), 1);
        assert!(graph.nodes.iter().all(|n| n.node_type != NodeType::External));
    }

    #[test]
    fn unresolved_call_creates_external_node() {
        let src = "def main():\n    return unknown_fn()\n";
        let result = chunk_file("demo", "a.py", Language::Python, src, None);
        let graph = build("demo", &result.chunks);
        assert!(graph.nodes.iter().any(|n| n.node_type == NodeType::External && n.label == "unknown_fn"));
    }

    #[test]
    fn no_duplicate_edges_for_same_triple() {
        let src = "def helper():\n    return 1\n\ndef main():\n    helper()\n    helper()\n";
        let result = chunk_file("demo", "a.py", Language::Python, src, None);
        let graph = build("demo", &result.chunks);
        let calls: Vec<_> = graph.edges.iter().filter(|e| e.relation_type == RelationType::Calls).collect();
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn pagerank_sums_close_to_one() {
        let src = "def a():\n    return b()\n\ndef b():\n    return a()\n";
        let result = chunk_file("demo", "a.py", Language::Python, src, None);
        let graph = build("demo", &result.chunks);
        let total: f64 = graph.metrics.values().map(|m| m.page_rank).sum();
        assert!((total - 1.0).abs() < 1e-3, "total={total}");
    }

    #[test]
    fn class_contains_its_methods() {
        let src = "class Greeter:\n    def greet(self):\n        return 1\n";
        let result = chunk_file("demo", "g.py", Language::Python, src, None);
        let graph = build("demo", &result.chunks);
        assert!(graph.edges.iter().any(|e| e.relation_type == RelationType::Contains));
    }
}
