//! End-to-end scenarios against the `sqlite`-backed gateway: exercises
//! `MnemoliteEngine` the way an external caller would, across indexing,
//! search, memory, and degraded-embedding paths.

use mnemolite_core::config::EngineConfig;
use mnemolite_core::features::embedding::{EmbeddingProvider, MockEmbeddingProvider};
use mnemolite_orchestration::{FileInput, IndexOptions, MnemoliteEngine};
use mnemolite_storage::domain::{
    ChunkFilters, ChunkType, EmbeddingDomain, Language, Memory, MemoryListFilters, MemoryType,
    StorageGateway,
};
use mnemolite_storage::error::{EngineError, Result};
use mnemolite_storage::infrastructure::sqlite::SqliteGateway;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use uuid::Uuid;

fn in_memory_engine() -> MnemoliteEngine {
    let gateway: Arc<dyn StorageGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(8));
    let mut config = EngineConfig::default();
    config.embedding.dim = 8;
    MnemoliteEngine::new(gateway, provider, config)
}

fn no_cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

/// S1 — index a trivial TypeScript file and find it by lexical search.
#[tokio::test]
async fn s1_index_and_search_a_trivial_ts_file() {
    let engine = in_memory_engine();
    let source = "export function validateUser(email: string): boolean {\n  if (!email) return false;\n  return email.includes('@');\n}\n";
    let files = vec![FileInput {
        path: "user.ts".to_string(),
        content: source.to_string(),
        language: Some(Language::TypeScript),
    }];
    let summary = engine
        .index_files("demo", files, None, IndexOptions::default(), no_cancel())
        .await
        .unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.chunks, 1);

    let hits = engine
        .search_lexical("validateUser", &ChunkFilters::default(), None, 10)
        .await
        .unwrap();
    assert_eq!(hits[0].rank, 1);
    assert!(hits[0].score >= 0.5);
}

/// S3 — an embedding provider that always fails still lets the file commit,
/// with `embedding_code` left unset; vector search comes back empty and
/// hybrid search still finds the chunk via the lexical list.
#[tokio::test]
async fn s3_embedding_failure_degrades_gracefully() {
    struct AlwaysFailingProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for AlwaysFailingProvider {
        async fn embed(&self, _domain: EmbeddingDomain, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(EngineError::embedding_unavailable("embedding backend down"))
        }
        fn dimension(&self) -> usize {
            8
        }
    }

    let gateway: Arc<dyn StorageGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(AlwaysFailingProvider);
    let mut config = EngineConfig::default();
    config.embedding.dim = 8;
    let engine = MnemoliteEngine::new(gateway.clone(), provider, config);

    let files = vec![FileInput {
        path: "a.py".to_string(),
        content: "def f():\n    pass\n".to_string(),
        language: Some(Language::Python),
    }];
    let summary = engine
        .index_files("demo", files, None, IndexOptions::default(), no_cancel())
        .await
        .unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.chunks, 1);

    let chunks = gateway.get_chunks("demo").await.unwrap();
    assert!(chunks[0].embedding_code.is_none());

    let vector_hits = engine
        .search_vector(&[0.0; 8], EmbeddingDomain::Code, &ChunkFilters::default(), None, 10)
        .await
        .unwrap();
    assert!(vector_hits.is_empty());

    let response = engine
        .search_hybrid("f", &ChunkFilters::default(), 10, false, None)
        .await
        .unwrap();
    assert!(!response.hits.is_empty());
    assert!(response.lexical_active);
    assert!(!response.vector_active);
}

/// S5 — a memory can only be permanently deleted after being soft-deleted.
#[tokio::test]
async fn s5_soft_delete_then_permanent_delete() {
    let engine = in_memory_engine();
    let memory = Memory {
        id: Uuid::new_v4(),
        title: "design note".to_string(),
        content: "why we picked RRF".to_string(),
        memory_type: MemoryType::Decision,
        tags: std::collections::HashSet::new(),
        author: "demo".to_string(),
        project_id: None,
        related_chunks: std::collections::HashSet::new(),
        resource_links: vec![],
        embedding: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        deleted_at: None,
    };
    let id = engine.create_memory(&memory).await.unwrap();

    let err = engine.delete_memory_permanently(id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    engine.soft_delete_memory(id).await.unwrap();
    assert!(engine.get_memory(id).await.unwrap().is_none());

    engine.delete_memory_permanently(id).await.unwrap();
    let (remaining, total) = engine
        .list_memories(&MemoryListFilters::default(), 10, 0)
        .await
        .unwrap();
    assert!(remaining.is_empty());
    assert_eq!(total, 0);
}

/// S6 (reduced) — indexing the same repository with 1 vs 4 workers yields
/// the same `(file_path, name_path, start_line)` chunk set and edge count.
#[tokio::test]
async fn s6_worker_count_does_not_change_indexing_result() {
    let files: Vec<FileInput> = (0..12)
        .map(|i| FileInput {
            path: format!("m{i}.py"),
            content: format!("def f{i}():\n    return f{}()\n", (i + 1) % 12),
            language: Some(Language::Python),
        })
        .collect();

    let mut options_one = IndexOptions::default();
    options_one.workers = 1;
    let engine_one = in_memory_engine();
    let summary_one = engine_one
        .index_files("demo", files.clone(), None, options_one, no_cancel())
        .await
        .unwrap();

    let mut options_many = IndexOptions::default();
    options_many.workers = 8;
    let engine_many = in_memory_engine();
    let summary_many = engine_many
        .index_files("demo", files, None, options_many, no_cancel())
        .await
        .unwrap();

    assert_eq!(summary_one.chunks, summary_many.chunks);
    assert_eq!(summary_one.edges, summary_many.edges);
}

/// Boundary behaviour: empty lexical query is rejected.
#[tokio::test]
async fn empty_lexical_query_is_invalid_argument() {
    let engine = in_memory_engine();
    let err = engine
        .search_lexical("", &ChunkFilters::default(), None, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

/// Boundary behaviour: wrong vector dimension is rejected before it
/// reaches the gateway.
#[tokio::test]
async fn wrong_vector_dimension_is_invalid_argument() {
    let engine = in_memory_engine();
    let err = engine
        .search_vector(&[0.0; 3], EmbeddingDomain::Code, &ChunkFilters::default(), None, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

/// `DeleteRepository` after `IndexRepository` leaves the repository's
/// chunk/graph counts at zero.
#[tokio::test]
async fn delete_repository_clears_chunks_and_graph() {
    let engine = in_memory_engine();
    let files = vec![FileInput {
        path: "a.py".to_string(),
        content: "def f():\n    return 1\n\ndef g():\n    return f()\n".to_string(),
        language: Some(Language::Python),
    }];
    engine
        .index_files("demo", files, None, IndexOptions::default(), no_cancel())
        .await
        .unwrap();

    engine.delete_repository("demo").await.unwrap();

    let hits = engine
        .search_lexical("f", &ChunkFilters::default(), Some(0.0), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[allow(dead_code)]
fn unused_chunk_type_reference() -> ChunkType {
    ChunkType::Function
}
