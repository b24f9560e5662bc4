//! Indexing Pipeline (C6) and the `MnemoliteEngine` facade (spec §6):
//! the crate that ties `mnemolite-core`'s feature modules to
//! `mnemolite-storage`'s gateway and drives the end-to-end indexing and
//! query flows external callers use.

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod scanner;
pub mod worker;

pub use engine::{GraphTraversalResult, HealthReport, HybridSearchResponse, MnemoliteEngine, TraverseDirection};
pub use error::{EngineError, Result};
pub use pipeline::{FileInput, IndexOptions, IndexingErrorRecord, IndexingPipeline, Summary};
pub use scanner::{default_excludes, scan, ScannedFile};
pub use worker::{process_file, FileResult, WorkerOptions};
