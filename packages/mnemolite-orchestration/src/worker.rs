//! Per-file atomic processing (spec §4.6 steps a-e): chunk, extract
//! metadata (folded into chunking, see `mnemolite_core::features::chunking`),
//! embed, commit in one transaction. A file's failure never aborts the
//! pipeline — it is recorded and processing continues.

use mnemolite_core::features::breaker::with_timeout;
use mnemolite_core::features::chunking;
use mnemolite_core::features::embedding::EmbeddingProvider;
use mnemolite_storage::domain::{Chunk, EmbeddingDomain, Language, StorageGateway};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct FileResult {
    pub file_path: String,
    pub success: bool,
    pub chunks_created: usize,
    pub error: Option<String>,
}

pub struct WorkerOptions {
    pub generate_embeddings: bool,
    pub extract_metadata: bool,
    pub index_file_timeout: Duration,
}

/// Processes one file end to end. Never returns `Err` for a file-local
/// failure (chunk/embed/commit); those become `FileResult { success: false, .. }`
/// so the caller can keep going (spec §4.6 continue-on-error).
pub async fn process_file(
    gateway: &dyn StorageGateway,
    embedding_provider: &dyn EmbeddingProvider,
    repository: &str,
    path: &Path,
    language: Language,
    commit_hash: Option<String>,
    options: &WorkerOptions,
) -> FileResult {
    let file_path = path.to_string_lossy().to_string();

    let result = with_timeout("index_file", options.index_file_timeout, async {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| mnemolite_storage::error::EngineError::internal(format!("read {file_path}: {e}")))?;

        let chunking_result = chunking::chunk_file(repository, &file_path, language, &source, commit_hash.clone());
        let mut chunks = chunking_result.chunks;

        if !options.extract_metadata {
            for chunk in chunks.iter_mut() {
                chunk.metadata = serde_json::json!({});
            }
        }

        if options.generate_embeddings {
            embed_chunks(embedding_provider, &mut chunks).await;
        }

        let created = chunks.len();
        gateway.replace_file_chunks(repository, &file_path, chunks).await?;
        Ok(created)
    })
    .await;

    match result {
        Ok(chunks_created) => FileResult {
            file_path,
            success: true,
            chunks_created,
            error: None,
        },
        Err(e) => {
            warn!(file = %file_path, error = %e, "file processing failed");
            FileResult {
                file_path,
                success: false,
                chunks_created: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Embedding failure is recoverable at the chunk level (spec §4.6 step c,
/// §7 `EmbeddingUnavailable`): a chunk is written without its embedding
/// rather than failing the whole file.
async fn embed_chunks(embedding_provider: &dyn EmbeddingProvider, chunks: &mut [Chunk]) {
    let texts: Vec<String> = chunks.iter().map(|c| c.source_code.clone()).collect();
    if let Ok(vectors) = embedding_provider.embed(EmbeddingDomain::Code, &texts).await {
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding_code = Some(vector);
        }
    }
    let signatures: Vec<String> = chunks
        .iter()
        .map(|c| c.name.clone().unwrap_or_else(|| c.name_path.clone()))
        .collect();
    if let Ok(vectors) = embedding_provider.embed(EmbeddingDomain::Text, &signatures).await {
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding_text = Some(vector);
        }
    }
}

/// Not currently used directly (kept for symmetry with `WorkerOptions`'s
/// name); workers are spawned inline by `pipeline::run`.
pub type SharedGateway = Arc<dyn StorageGateway>;

#[cfg(test)]
mod tests {
    use super::*;
    use mnemolite_core::features::embedding::MockEmbeddingProvider;
    use mnemolite_storage::infrastructure::sqlite::SqliteGateway;
    use std::path::PathBuf;

    fn sqlite_gateway() -> SqliteGateway {
        SqliteGateway::open_in_memory().expect("in-memory sqlite gateway")
    }

    fn write_temp_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mnemolite-worker-test-{}.py", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn successful_file_is_chunked_and_committed() {
        let gateway = sqlite_gateway();
        let path = write_temp_file("def f():\n    return 1\n");
        let options = WorkerOptions {
            generate_embeddings: true,
            extract_metadata: true,
            index_file_timeout: Duration::from_secs(10),
        };
        let embedder = MockEmbeddingProvider::new(8);
        let result = process_file(&gateway, &embedder, "demo", &path, Language::Python, None, &options).await;
        assert!(result.success);
        assert_eq!(result.chunks_created, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_is_recorded_as_failure_not_panic() {
        let gateway = sqlite_gateway();
        let options = WorkerOptions {
            generate_embeddings: false,
            extract_metadata: true,
            index_file_timeout: Duration::from_secs(10),
        };
        let embedder = MockEmbeddingProvider::new(8);
        let missing = Path::new("/nonexistent/path/does/not/exist.py");
        let result = process_file(&gateway, &embedder, "demo", missing, Language::Python, None, &options).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
