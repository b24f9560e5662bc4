//! MnemoLite — Hybrid Retrieval & Indexing Engine core (spec §2).
//!
//! Feature-first layout, one vertical slice per component: `features::`
//! holds the Chunker/Metadata Extractor/Embedding Provider/Graph
//! Builder/Cascade Cache/Lexical+Vector Search/RRF Fusion/Memory
//! Store/Timeout-Breaker Kernel. `mnemolite-storage` owns the domain
//! model and the `StorageGateway` port this crate is built against.
//!
//! The top-level `MnemoliteEngine` facade (spec §6) lives in
//! `mnemolite-orchestration` rather than here: it dispatches indexing
//! requests to the Indexing Pipeline (C6), which in turn depends on this
//! crate's `features::chunking`/`features::graph_builder`, so the facade
//! cannot live on this side of that dependency edge without a cycle.

pub mod config;
pub mod features;

pub use config::EngineConfig;
pub use mnemolite_storage::error::{EngineError, Result};
