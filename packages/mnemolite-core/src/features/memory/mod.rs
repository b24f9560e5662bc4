//! Memory Store (C11, spec §4.11): CRUD plus vector search and listing
//! for free-form memories, on top of `StorageGateway`'s already-atomic
//! per-row operations. This module owns the state-machine and
//! embedding-preservation rules the storage layer intentionally leaves to
//! its caller.

use mnemolite_storage::domain::{Memory, MemoryListFilters, MemoryPatch, StorageGateway};
use mnemolite_storage::error::EngineError;
use mnemolite_storage::Result;
use uuid::Uuid;

/// `Create(memory, embedding?) -> id` (spec §4.11). Duplicate
/// `(project_id, title)` among non-deleted rows is rejected by the
/// gateway as `Conflict`; this call does not re-check it, to avoid a
/// check-then-act race against a concurrent create.
pub async fn create(gateway: &dyn StorageGateway, memory: &Memory) -> Result<Uuid> {
    gateway.create_memory(memory).await
}

/// `GetByID(id) -> memory?`. A soft-deleted row is invisible here.
pub async fn get(gateway: &dyn StorageGateway, id: Uuid) -> Result<Option<Memory>> {
    gateway.get_memory(id).await
}

/// `Update(id, patch, regenerate_embedding?)` (spec §4.11). The caller
/// supplies `new_embedding` only when `title`/`content` changed and a
/// fresh embedding was computed; passing `None` preserves the existing
/// embedding untouched.
pub async fn update(
    gateway: &dyn StorageGateway,
    id: Uuid,
    patch: &MemoryPatch,
    new_embedding: Option<Vec<f32>>,
) -> Result<()> {
    gateway.update_memory(id, patch, new_embedding).await
}

/// `ALIVE -> DELETED` (spec §4.11 state machine). Idempotent transitions
/// (`DELETED -> DELETED`) are rejected by the gateway as `NotFound` since
/// `GetByID`-style lookups for soft delete only see live rows.
pub async fn soft_delete(gateway: &dyn StorageGateway, id: Uuid) -> Result<()> {
    gateway.soft_delete_memory(id).await
}

/// `DELETED -> REMOVED` (spec §4.11 state machine). Refuses to delete a
/// row that is still `ALIVE`: no undelete in this spec, so skipping the
/// soft-delete step would silently bypass it.
pub async fn delete_permanently(gateway: &dyn StorageGateway, id: Uuid) -> Result<()> {
    let existing = gateway.get_memory_including_deleted(id).await?;
    match existing {
        None => Err(EngineError::not_found(format!("memory {id} not found"))),
        Some(memory) if memory.deleted_at.is_none() => Err(EngineError::invalid_argument(
            "memory must be soft-deleted before permanent removal",
        )),
        Some(_) => gateway.delete_memory_permanently(id).await,
    }
}

/// `List(filters, limit, offset) -> (memories, total)`.
pub async fn list(
    gateway: &dyn StorageGateway,
    filters: &MemoryListFilters,
    limit: usize,
    offset: usize,
) -> Result<(Vec<Memory>, u64)> {
    gateway.list_memories(filters, limit, offset).await
}

/// `SearchByVector(vector, filters, limit, distance_threshold) -> (memories, total)`.
pub async fn search_by_vector(
    gateway: &dyn StorageGateway,
    vector: &[f32],
    filters: &MemoryListFilters,
    limit: usize,
    distance_threshold: Option<f32>,
    expected_dim: usize,
) -> Result<(Vec<Memory>, u64)> {
    if vector.len() != expected_dim {
        return Err(EngineError::invalid_argument(format!(
            "memory vector search expected dimension {expected_dim}, got {}",
            vector.len()
        )));
    }
    gateway
        .search_memories_by_vector(vector, filters, limit, distance_threshold)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mnemolite_storage::domain::{
        Chunk, ChunkFilters, ComputedMetrics, DetailedMetadata, Edge, EmbeddingDomain, LexicalHit,
        Node, VectorHit,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        memories: Mutex<std::collections::HashMap<Uuid, Memory>>,
    }

    #[async_trait]
    impl StorageGateway for FakeGateway {
        async fn add_chunk(&self, _chunk: &Chunk) -> Result<Uuid> {
            unimplemented!()
        }
        async fn get_chunks(&self, _repository: &str) -> Result<Vec<Chunk>> {
            unimplemented!()
        }
        async fn get_chunks_for_file(&self, _repository: &str, _file_path: &str) -> Result<Vec<Chunk>> {
            unimplemented!()
        }
        async fn delete_by_repository(&self, _repository: &str) -> Result<u64> {
            unimplemented!()
        }
        async fn delete_by_file(&self, _repository: &str, _file_path: &str) -> Result<u64> {
            unimplemented!()
        }
        async fn count_chunks(&self, _repository: &str) -> Result<u64> {
            unimplemented!()
        }
        async fn replace_file_chunks(&self, _repository: &str, _file_path: &str, _chunks: Vec<Chunk>) -> Result<usize> {
            unimplemented!()
        }
        async fn upsert_node(&self, _node: &Node) -> Result<Uuid> {
            unimplemented!()
        }
        async fn upsert_edge(&self, _edge: &Edge) -> Result<Uuid> {
            unimplemented!()
        }
        async fn get_nodes(&self, _repository: &str) -> Result<Vec<Node>> {
            unimplemented!()
        }
        async fn get_edges(&self, _repository: &str) -> Result<Vec<Edge>> {
            unimplemented!()
        }
        async fn get_node(&self, _id: Uuid) -> Result<Option<Node>> {
            unimplemented!()
        }
        async fn get_outbound_edges(&self, _node_id: Uuid) -> Result<Vec<Edge>> {
            unimplemented!()
        }
        async fn get_inbound_edges(&self, _node_id: Uuid) -> Result<Vec<Edge>> {
            unimplemented!()
        }
        async fn write_graph_batch(&self, _nodes: Vec<Node>, _edges: Vec<Edge>, _edge_batch_size: usize) -> Result<()> {
            unimplemented!()
        }
        async fn put_detailed_metadata(&self, _meta: &DetailedMetadata) -> Result<()> {
            unimplemented!()
        }
        async fn put_computed_metrics(&self, _node_id: Uuid, _metrics: ComputedMetrics) -> Result<()> {
            unimplemented!()
        }
        async fn delete_graph_for_repository(&self, _repository: &str) -> Result<()> {
            unimplemented!()
        }
        async fn trigram_search(&self, _query: &str, _filters: &ChunkFilters, _threshold: f32, _limit: usize) -> Result<Vec<LexicalHit>> {
            unimplemented!()
        }
        async fn vector_search(&self, _vector: &[f32], _domain: EmbeddingDomain, _filters: &ChunkFilters, _ef_search: u32, _limit: usize) -> Result<Vec<VectorHit>> {
            unimplemented!()
        }
        async fn count_by_filter(&self, _filters: &ChunkFilters) -> Result<u64> {
            unimplemented!()
        }
        async fn create_memory(&self, memory: &Memory) -> Result<Uuid> {
            self.memories.lock().insert(memory.id, memory.clone());
            Ok(memory.id)
        }
        async fn get_memory(&self, id: Uuid) -> Result<Option<Memory>> {
            Ok(self.memories.lock().get(&id).filter(|m| m.is_visible()).cloned())
        }
        async fn update_memory(&self, _id: Uuid, _patch: &MemoryPatch, _new_embedding: Option<Vec<f32>>) -> Result<()> {
            unimplemented!()
        }
        async fn soft_delete_memory(&self, id: Uuid) -> Result<()> {
            if let Some(m) = self.memories.lock().get_mut(&id) {
                m.deleted_at = Some(chrono::Utc::now());
            }
            Ok(())
        }
        async fn delete_memory_permanently(&self, id: Uuid) -> Result<()> {
            self.memories.lock().remove(&id);
            Ok(())
        }
        async fn get_memory_including_deleted(&self, id: Uuid) -> Result<Option<Memory>> {
            Ok(self.memories.lock().get(&id).cloned())
        }
        async fn list_memories(&self, _filters: &MemoryListFilters, _limit: usize, _offset: usize) -> Result<(Vec<Memory>, u64)> {
            unimplemented!()
        }
        async fn search_memories_by_vector(&self, _vector: &[f32], _filters: &MemoryListFilters, _limit: usize, _distance_threshold: Option<f32>) -> Result<(Vec<Memory>, u64)> {
            unimplemented!()
        }
        async fn ensure_project(&self, _name: &str) -> Result<Uuid> {
            unimplemented!()
        }
        async fn record_indexing_error(&self, _repository: &str, _file_path: &str, _stage: &str, _message: &str) -> Result<()> {
            unimplemented!()
        }
    }

    fn sample() -> Memory {
        Memory {
            id: Uuid::new_v4(),
            title: "t".into(),
            content: "c".into(),
            memory_type: mnemolite_storage::domain::MemoryType::Note,
            tags: Default::default(),
            author: "a".into(),
            project_id: None,
            related_chunks: Default::default(),
            resource_links: vec![],
            embedding: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn permanent_delete_requires_prior_soft_delete() {
        let gw = FakeGateway::default();
        let memory = sample();
        create(&gw, &memory).await.unwrap();
        let err = delete_permanently(&gw, memory.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn permanent_delete_succeeds_after_soft_delete() {
        let gw = FakeGateway::default();
        let memory = sample();
        create(&gw, &memory).await.unwrap();
        soft_delete(&gw, memory.id).await.unwrap();
        delete_permanently(&gw, memory.id).await.unwrap();
        assert!(gw.get_memory_including_deleted(memory.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn soft_deleted_memory_is_invisible_to_get() {
        let gw = FakeGateway::default();
        let memory = sample();
        create(&gw, &memory).await.unwrap();
        soft_delete(&gw, memory.id).await.unwrap();
        assert!(get(&gw, memory.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vector_search_rejects_dimension_mismatch() {
        let gw = FakeGateway::default();
        let filters = MemoryListFilters::default();
        let err = search_by_vector(&gw, &[1.0, 2.0], &filters, 10, None, 768).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
