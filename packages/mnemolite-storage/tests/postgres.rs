//! Postgres-backed properties that only this adapter exercises for real:
//! `pg_trgm` similarity scoring and `pgvector` HNSW distance, against a
//! live database. Ignored by default; run with
//! `DATABASE_URL=postgres://... cargo test --features postgres -- --ignored`.

#![cfg(feature = "postgres")]

use chrono::Utc;
use mnemolite_storage::domain::{Chunk, ChunkFilters, ChunkType, EmbeddingDomain, Language, StorageGateway};
use mnemolite_storage::infrastructure::postgres::PostgresGateway;
use uuid::Uuid;

async fn gateway() -> PostgresGateway {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    PostgresGateway::connect(&url, 5).await.unwrap()
}

fn sample_chunk(repo: &str, file: &str, name: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: Uuid::new_v4(),
        repository: repo.into(),
        file_path: file.into(),
        language: Language::TypeScript,
        chunk_type: ChunkType::Function,
        name: Some(name.into()),
        name_path: name.into(),
        source_code: format!("function {name}() {{}}"),
        start_line: 1,
        end_line: 3,
        metadata: serde_json::json!({}),
        embedding_text: None,
        embedding_code: Some(embedding),
        commit_hash: None,
        indexed_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore]
async fn trigram_search_ranks_closer_names_higher() {
    let gw = gateway().await;
    gw.add_chunk(&sample_chunk("demo", "user.ts", "validateUser", vec![0.0; 768]))
        .await
        .unwrap();
    gw.add_chunk(&sample_chunk("demo", "other.ts", "computeTotals", vec![0.0; 768]))
        .await
        .unwrap();

    let hits = gw
        .trigram_search("validateUser", &ChunkFilters::default(), 0.1, 10)
        .await
        .unwrap();
    assert_eq!(hits[0].rank, 1);
    assert!(hits.iter().all(|h| h.score >= 0.1));

    gw.delete_by_repository("demo").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn vector_search_orders_by_cosine_distance() {
    let gw = gateway().await;
    let mut near = vec![0.0f32; 768];
    near[0] = 1.0;
    let mut far = vec![0.0f32; 768];
    far[767] = 1.0;
    gw.add_chunk(&sample_chunk("demo", "near.ts", "near", near.clone()))
        .await
        .unwrap();
    gw.add_chunk(&sample_chunk("demo", "far.ts", "far", far))
        .await
        .unwrap();

    let hits = gw
        .vector_search(&near, EmbeddingDomain::Code, &ChunkFilters::default(), 100, 10)
        .await
        .unwrap();
    assert_eq!(hits[0].chunk_id, gw.get_chunks_for_file("demo", "near.ts").await.unwrap()[0].id);

    gw.delete_by_repository("demo").await.unwrap();
}
