//! Indexing Pipeline (C6, spec §4.6): 4-phase orchestration over a worker
//! pool (bounded producer/consumer queue, per-file atomic commit,
//! continue-on-error), built around a simple "chunk -> embed -> commit,
//! then one serial graph pass" model rather than a DAG-of-stages job
//! state machine.

use crate::scanner::{self, ScannedFile};
use crate::worker::{self, FileResult, WorkerOptions};
use mnemolite_core::features::embedding::EmbeddingProvider;
use mnemolite_core::features::graph_builder;
use mnemolite_storage::domain::StorageGateway;
use mnemolite_storage::error::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub generate_embeddings: bool,
    pub build_graph: bool,
    pub extract_metadata: bool,
    pub excludes: Vec<String>,
    pub workers: usize,
    pub index_file_timeout: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            generate_embeddings: true,
            build_graph: true,
            extract_metadata: true,
            excludes: scanner::default_excludes(),
            workers: 4,
            index_file_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexingErrorRecord {
    pub file: String,
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub files: usize,
    pub chunks: usize,
    pub nodes: usize,
    pub edges: usize,
    pub errors: Vec<IndexingErrorRecord>,
}

/// One `FileInput` for `IndexFiles` (spec §6), bypassing the filesystem
/// scanner — content is supplied in memory.
pub struct FileInput {
    pub path: String,
    pub content: String,
    pub language: Option<mnemolite_storage::domain::Language>,
}

pub struct IndexingPipeline {
    gateway: Arc<dyn StorageGateway>,
    embedding_provider_factory: Arc<dyn Fn() -> Arc<dyn EmbeddingProvider> + Send + Sync>,
}

impl IndexingPipeline {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        embedding_provider_factory: Arc<dyn Fn() -> Arc<dyn EmbeddingProvider> + Send + Sync>,
    ) -> Self {
        Self { gateway, embedding_provider_factory }
    }

    /// `IndexRepository(root, options)` (spec §6).
    pub async fn index_repository(
        &self,
        repository: &str,
        root: &std::path::Path,
        commit_hash: Option<String>,
        options: &IndexOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Summary> {
        let scanned = scanner::scan(root, &options.excludes);
        self.run(repository, scanned, commit_hash, options, cancel).await
    }

    /// `IndexFiles([{path,content,language?}], options)` (spec §6): the
    /// in-memory equivalent of `IndexRepository`, used when the caller
    /// already has file contents (no filesystem walk, no re-read).
    pub async fn index_files(
        &self,
        repository: &str,
        files: Vec<FileInput>,
        commit_hash: Option<String>,
        options: &IndexOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Summary> {
        // Phase 1: cleanup (spec §4.6 phase order).
        self.gateway.delete_by_repository(repository).await?;
        self.gateway.delete_graph_for_repository(repository).await?;

        let mut errors = Vec::new();
        let mut chunks_total = 0usize;
        let mut files_done = 0usize;

        for file in files {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let Some(language) = file.language.or_else(|| {
                std::path::Path::new(&file.path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(mnemolite_storage::domain::Language::from_extension)
            }) else {
                continue;
            };
            let embedding_provider = (self.embedding_provider_factory)();
            let chunking_result = mnemolite_core::features::chunking::chunk_file(
                repository,
                &file.path,
                language,
                &file.content,
                commit_hash.clone(),
            );
            let mut chunks = chunking_result.chunks;
            if !options.extract_metadata {
                for chunk in chunks.iter_mut() {
                    chunk.metadata = serde_json::json!({});
                }
            }
            if options.generate_embeddings {
                embed_in_place(embedding_provider.as_ref(), &mut chunks).await;
            }
            let created = chunks.len();
            match self.gateway.replace_file_chunks(repository, &file.path, chunks).await {
                Ok(_) => {
                    files_done += 1;
                    chunks_total += created;
                }
                Err(e) => {
                    let _ = self
                        .gateway
                        .record_indexing_error(repository, &file.path, "commit", &e.to_string())
                        .await;
                    errors.push(IndexingErrorRecord {
                        file: file.path.clone(),
                        stage: "commit".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let (nodes, edges) = if options.build_graph {
            self.build_graph(repository).await?
        } else {
            (0, 0)
        };

        Ok(Summary {
            files: files_done,
            chunks: chunks_total,
            nodes,
            edges,
            errors,
        })
    }

    async fn run(
        &self,
        repository: &str,
        scanned: Vec<ScannedFile>,
        commit_hash: Option<String>,
        options: &IndexOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Summary> {
        let started = Instant::now();
        info!(repository, files = scanned.len(), workers = options.workers, "starting repository index");

        // Phase 1 (cleanup): synchronous, one transaction per spec's FK
        // order (graph depends on chunks, so graph rows go first).
        self.gateway.delete_graph_for_repository(repository).await?;
        self.gateway.delete_by_repository(repository).await?;

        // Phase 2 (file processing): bounded queue, N workers, parallel,
        // each file atomic (spec §4.6 concurrency model).
        let queue_capacity = options.workers * 4;
        let (tx, rx) = mpsc::channel::<PathBuf>(queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for file in scanned {
                if producer_cancel.load(Ordering::Relaxed) {
                    break;
                }
                if tx.send(file.path).await.is_err() {
                    break;
                }
            }
        });

        let mut handles = Vec::with_capacity(options.workers);
        for _ in 0..options.workers {
            let rx = rx.clone();
            let gateway = self.gateway.clone();
            let embedding_provider = (self.embedding_provider_factory)();
            let repository = repository.to_string();
            let commit_hash = commit_hash.clone();
            let worker_cancel = cancel.clone();
            let worker_options = WorkerOptions {
                generate_embeddings: options.generate_embeddings,
                extract_metadata: options.extract_metadata,
                index_file_timeout: options.index_file_timeout,
            };
            handles.push(tokio::spawn(async move {
                let mut results = Vec::new();
                loop {
                    if worker_cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let path = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(path) = path else { break };
                    let language = mnemolite_storage::domain::Language::from_extension(
                        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
                    );
                    let Some(language) = language else { continue };
                    let result = worker::process_file(
                        gateway.as_ref(),
                        embedding_provider.as_ref(),
                        &repository,
                        &path,
                        language,
                        commit_hash.clone(),
                        &worker_options,
                    )
                    .await;
                    if !result.success {
                        warn!(
                            repository = %repository,
                            file = %result.file_path,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "file indexing failed, continuing"
                        );
                        let _ = gateway
                            .record_indexing_error(
                                &repository,
                                &result.file_path,
                                "commit",
                                result.error.as_deref().unwrap_or("unknown"),
                            )
                            .await;
                    }
                    results.push(result);
                }
                results
            }));
        }

        let _ = producer.await;
        let mut file_results: Vec<FileResult> = Vec::new();
        for handle in handles {
            if let Ok(results) = handle.await {
                file_results.extend(results);
            }
        }

        let errors: Vec<IndexingErrorRecord> = file_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| IndexingErrorRecord {
                file: r.file_path.clone(),
                stage: "commit".to_string(),
                message: r.error.clone().unwrap_or_default(),
            })
            .collect();
        let files_done = file_results.iter().filter(|r| r.success).count();
        let chunks_total: usize = file_results.iter().map(|r| r.chunks_created).sum();

        // Phase 3 + 4 (graph construction, then metrics): single-writer,
        // reads committed chunks (spec §4.6's "graph may lag by one phase").
        let (nodes, edges) = if options.build_graph && !cancel.load(Ordering::Relaxed) {
            self.build_graph(repository).await?
        } else {
            (0, 0)
        };

        info!(
            repository,
            files = files_done,
            chunks = chunks_total,
            nodes,
            edges,
            failed = errors.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "repository index finished"
        );

        Ok(Summary {
            files: files_done,
            chunks: chunks_total,
            nodes,
            edges,
            errors,
        })
    }

    /// Phase 3 (graph construction) + Phase 4 (metrics): serial, reads
    /// committed chunks.
    async fn build_graph(&self, repository: &str) -> Result<(usize, usize)> {
        let chunks = self.gateway.get_chunks(repository).await?;
        let result = graph_builder::build(repository, &chunks);
        let node_count = result.nodes.len();
        let edge_count = result.edges.len();
        self.gateway
            .write_graph_batch(result.nodes, result.edges, 1000)
            .await?;
        for (node_id, metrics) in result.metrics {
            self.gateway.put_computed_metrics(node_id, metrics).await?;
        }
        Ok((node_count, edge_count))
    }
}

async fn embed_in_place(provider: &dyn EmbeddingProvider, chunks: &mut [mnemolite_storage::domain::Chunk]) {
    use mnemolite_storage::domain::EmbeddingDomain;
    let code_texts: Vec<String> = chunks.iter().map(|c| c.source_code.clone()).collect();
    if let Ok(vectors) = provider.embed(EmbeddingDomain::Code, &code_texts).await {
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding_code = Some(vector);
        }
    }
    let text_texts: Vec<String> = chunks
        .iter()
        .map(|c| c.name.clone().unwrap_or_else(|| c.name_path.clone()))
        .collect();
    if let Ok(vectors) = provider.embed(EmbeddingDomain::Text, &text_texts).await {
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding_text = Some(vector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemolite_core::features::embedding::MockEmbeddingProvider;
    use mnemolite_storage::infrastructure::sqlite::SqliteGateway;

    fn pipeline() -> IndexingPipeline {
        let gateway: Arc<dyn StorageGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
        IndexingPipeline::new(gateway, Arc::new(|| Arc::new(MockEmbeddingProvider::new(8))))
    }

    #[tokio::test]
    async fn index_files_commits_chunks_and_builds_graph() {
        let pipeline = pipeline();
        let files = vec![FileInput {
            path: "a.py".to_string(),
            content: "def helper():\n    return 1\n\ndef main():\n    return helper()\n".to_string(),
            language: Some(mnemolite_storage::domain::Language::Python),
        }];
        let summary = pipeline
            .index_files("demo", files, None, &IndexOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.chunks, 2);
        assert!(summary.nodes >= 2);
        assert!(summary.edges >= 1);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn reindexing_a_repository_replaces_prior_chunks() {
        let pipeline = pipeline();
        let files = vec![FileInput {
            path: "a.py".to_string(),
            content: "def f():\n    return 1\n".to_string(),
            language: Some(mnemolite_storage::domain::Language::Python),
        }];
        pipeline
            .index_files("demo", files, None, &IndexOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        let files2 = vec![FileInput {
            path: "b.py".to_string(),
            content: "def g():\n    return 2\n".to_string(),
            language: Some(mnemolite_storage::domain::Language::Python),
        }];
        let summary = pipeline
            .index_files("demo", files2, None, &IndexOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(summary.chunks, 1);
    }
}
