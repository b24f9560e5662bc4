//! Graph domain model: Node, Edge, DetailedMetadata, ComputedMetrics,
//! EdgeWeights (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NodeType {
    Module,
    Function,
    Class,
    Method,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub node_type: NodeType,
    pub label: String,
    /// Always contains `repository`, `file_path`; optionally `chunk_id`.
    pub properties: Json,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn repository(&self) -> Option<&str> {
        self.properties.get("repository").and_then(|v| v.as_str())
    }

    pub fn chunk_id(&self) -> Option<Uuid> {
        self.properties
            .get("chunk_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Calls,
    Imports,
    Inherits,
    Contains,
    References,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub relation_type: RelationType,
    pub properties: Json,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// The uniqueness key spec §3 mandates: no duplicate `(source, target,
    /// relation_type)`.
    pub fn identity_key(&self) -> (Uuid, Uuid, RelationType) {
        (self.source_node_id, self.target_node_id, self.relation_type)
    }
}

/// Enriched per-chunk information (spec §3 "DetailedMetadata"), kept
/// separate from `chunks.metadata` for query efficiency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedMetadata {
    pub node_id: Uuid,
    pub chunk_id: Uuid,
    pub parameters: Vec<Json>,
    pub return_type: Option<String>,
    pub is_async: bool,
    pub cyclomatic: u32,
    pub lines_of_code: u32,
    pub call_contexts: Vec<Json>,
}

/// Per-node derived metrics, recomputed only on repository reindex.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ComputedMetrics {
    pub efferent_coupling: u32,
    pub afferent_coupling: u32,
    pub page_rank: f64,
}

/// Optional per-edge importance score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EdgeWeight {
    pub edge_id: Uuid,
    pub importance_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_identity_ignores_properties() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let e1 = Edge {
            id: Uuid::new_v4(),
            source_node_id: a,
            target_node_id: b,
            relation_type: RelationType::Calls,
            properties: serde_json::json!({"line": 1}),
            created_at: Utc::now(),
        };
        let e2 = Edge {
            properties: serde_json::json!({"line": 2}),
            ..e1.clone()
        };
        assert_eq!(e1.identity_key(), e2.identity_key());
    }
}
