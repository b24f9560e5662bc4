//! Domain layer: entities (spec §3) and the `StorageGateway` port (spec
//! §4.1). The port/adapter split puts a trait at the seam a Postgres
//! adapter and a SQLite test adapter both implement.

pub mod chunk;
pub mod graph;
pub mod memory;

pub use chunk::{Chunk, ChunkFilters, ChunkType, Language};
pub use graph::{ComputedMetrics, DetailedMetadata, Edge, EdgeWeight, Node, NodeType, RelationType};
pub use memory::{Memory, MemoryListFilters, MemoryPatch, MemoryType, Project};

use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// One row of a lexical (trigram) search result (spec §4.8).
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: Uuid,
    pub score: f32,
    pub rank: u32,
}

/// One row of a vector (HNSW) search result (spec §4.9).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: Uuid,
    pub distance: f32,
    pub rank: u32,
}

/// Embedding column selector (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingDomain {
    Text,
    Code,
}

/// Typed, at-most-once access to the relational + vector store (spec
/// §4.1). All write operations happen inside `in_transaction`; read
/// operations are snapshot-consistent within one call.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    // ---- Chunks -----------------------------------------------------
    async fn add_chunk(&self, chunk: &Chunk) -> Result<Uuid>;
    async fn get_chunks(&self, repository: &str) -> Result<Vec<Chunk>>;
    async fn get_chunks_for_file(&self, repository: &str, file_path: &str) -> Result<Vec<Chunk>>;
    async fn delete_by_repository(&self, repository: &str) -> Result<u64>;
    async fn delete_by_file(&self, repository: &str, file_path: &str) -> Result<u64>;
    async fn count_chunks(&self, repository: &str) -> Result<u64>;

    /// Replace all chunks of one file atomically: `DELETE` then `INSERT`
    /// inside a single transaction (spec §4.6 step (e)).
    async fn replace_file_chunks(
        &self,
        repository: &str,
        file_path: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize>;

    // ---- Graph --------------------------------------------------------
    async fn upsert_node(&self, node: &Node) -> Result<Uuid>;
    async fn upsert_edge(&self, edge: &Edge) -> Result<Uuid>;
    async fn get_nodes(&self, repository: &str) -> Result<Vec<Node>>;
    async fn get_edges(&self, repository: &str) -> Result<Vec<Edge>>;
    async fn get_node(&self, id: Uuid) -> Result<Option<Node>>;
    async fn get_outbound_edges(&self, node_id: Uuid) -> Result<Vec<Edge>>;
    async fn get_inbound_edges(&self, node_id: Uuid) -> Result<Vec<Edge>>;

    /// Write nodes then edges for one repository in a single transaction,
    /// batching edges in groups of `edge_batch_size` (spec §4.5 step 5).
    async fn write_graph_batch(
        &self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        edge_batch_size: usize,
    ) -> Result<()>;
    async fn put_detailed_metadata(&self, meta: &DetailedMetadata) -> Result<()>;
    async fn put_computed_metrics(&self, node_id: Uuid, metrics: ComputedMetrics) -> Result<()>;
    async fn delete_graph_for_repository(&self, repository: &str) -> Result<()>;

    // ---- Search ---------------------------------------------------------
    async fn trigram_search(
        &self,
        query: &str,
        filters: &ChunkFilters,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<LexicalHit>>;

    async fn vector_search(
        &self,
        vector: &[f32],
        domain: EmbeddingDomain,
        filters: &ChunkFilters,
        ef_search: u32,
        limit: usize,
    ) -> Result<Vec<VectorHit>>;

    async fn count_by_filter(&self, filters: &ChunkFilters) -> Result<u64>;

    // ---- Memories -------------------------------------------------------
    async fn create_memory(&self, memory: &Memory) -> Result<Uuid>;
    async fn get_memory(&self, id: Uuid) -> Result<Option<Memory>>;
    async fn update_memory(&self, id: Uuid, patch: &MemoryPatch, new_embedding: Option<Vec<f32>>) -> Result<()>;
    async fn soft_delete_memory(&self, id: Uuid) -> Result<()>;
    async fn delete_memory_permanently(&self, id: Uuid) -> Result<()>;
    async fn get_memory_including_deleted(&self, id: Uuid) -> Result<Option<Memory>>;
    async fn list_memories(
        &self,
        filters: &MemoryListFilters,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Memory>, u64)>;
    async fn search_memories_by_vector(
        &self,
        vector: &[f32],
        filters: &MemoryListFilters,
        limit: usize,
        distance_threshold: Option<f32>,
    ) -> Result<(Vec<Memory>, u64)>;

    // ---- Projects ---------------------------------------------------
    async fn ensure_project(&self, name: &str) -> Result<Uuid>;

    // ---- Indexing errors (ambient, spec §6 table list) ----------------
    async fn record_indexing_error(
        &self,
        repository: &str,
        file_path: &str,
        stage: &str,
        message: &str,
    ) -> Result<()>;
}
