//! Feature modules, one per hybrid-retrieval-engine component (spec §2).
//! Vertical slices: each module owns its own algorithm and talks to the
//! rest of the engine only through `mnemolite_storage::domain::StorageGateway`
//! and the shared `EngineError`.

pub mod breaker;
pub mod cache;
pub mod chunking;
pub mod embedding;
pub mod graph_builder;
pub mod memory;
pub mod metadata;
pub mod parsing;
pub mod search;
