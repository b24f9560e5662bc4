//! mnemolite-storage — typed access to the relational + vector store
//! (spec §4.1, Storage Gateway / C1).
//!
//! The production backend is PostgreSQL with the `pgvector` and `pg_trgm`
//! extensions (feature `postgres`); a `rusqlite`-backed adapter (feature
//! `sqlite`, default) gives the rest of the workspace a hermetic backend to
//! test against without a running database.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::{
    Chunk, ChunkFilters, ChunkType, ComputedMetrics, DetailedMetadata, Edge, EdgeWeight,
    EmbeddingDomain, Language, LexicalHit, Memory, MemoryListFilters, MemoryPatch, MemoryType,
    Node, NodeType, Project, RelationType, StorageGateway, VectorHit,
};
pub use error::{EngineError, Result};

/// Process-wide embedding dimension (spec §6 Configuration, `embedding.dim`).
/// Fixed at compile time per spec §3's "mixing dimensions across rows is
/// forbidden" invariant; deployments choose it at build time.
pub const DEFAULT_EMBEDDING_DIM: usize = 768;
