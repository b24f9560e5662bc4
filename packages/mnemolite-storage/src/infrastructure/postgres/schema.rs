//! Schema DDL for the production backend (spec §3). Applied idempotently
//! on connect; a real deployment would drive this through `sqlx::migrate!`
//! instead, but a single idempotent script keeps the adapter self-contained
//! for this engine.

use crate::error::{EngineError, Result};
use sqlx::PgPool;

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "
        CREATE EXTENSION IF NOT EXISTS vector;
        CREATE EXTENSION IF NOT EXISTS pg_trgm;

        CREATE TABLE IF NOT EXISTS chunks (
            id UUID PRIMARY KEY,
            repository TEXT NOT NULL,
            file_path TEXT NOT NULL,
            language TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            name TEXT,
            name_path TEXT NOT NULL,
            source_code TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}',
            embedding_text VECTOR(768),
            embedding_code VECTOR(768),
            commit_hash TEXT,
            indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (repository, file_path, name_path, start_line)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_repo_file ON chunks (repository, file_path);
        CREATE INDEX IF NOT EXISTS idx_chunks_source_trgm ON chunks USING GIN (source_code gin_trgm_ops);
        CREATE INDEX IF NOT EXISTS idx_chunks_name_trgm ON chunks USING GIN (name gin_trgm_ops);
        CREATE INDEX IF NOT EXISTS idx_chunks_embedding_text_hnsw
            ON chunks USING hnsw (embedding_text vector_cosine_ops);
        CREATE INDEX IF NOT EXISTS idx_chunks_embedding_code_hnsw
            ON chunks USING hnsw (embedding_code vector_cosine_ops);

        CREATE TABLE IF NOT EXISTS nodes (
            id UUID PRIMARY KEY,
            repository TEXT NOT NULL,
            node_type TEXT NOT NULL,
            label TEXT NOT NULL,
            properties JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_repo ON nodes (repository);

        CREATE TABLE IF NOT EXISTS edges (
            id UUID PRIMARY KEY,
            repository TEXT NOT NULL,
            source_node_id UUID NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
            target_node_id UUID NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            properties JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (source_node_id, target_node_id, relation_type)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_repo ON edges (repository);
        CREATE INDEX IF NOT EXISTS idx_edges_source ON edges (source_node_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (target_node_id);

        CREATE TABLE IF NOT EXISTS detailed_metadata (
            node_id UUID PRIMARY KEY REFERENCES nodes (id) ON DELETE CASCADE,
            chunk_id UUID NOT NULL,
            parameters JSONB NOT NULL DEFAULT '[]',
            return_type TEXT,
            is_async BOOLEAN NOT NULL DEFAULT false,
            cyclomatic INTEGER NOT NULL DEFAULT 1,
            lines_of_code INTEGER NOT NULL DEFAULT 0,
            call_contexts JSONB NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS computed_metrics (
            node_id UUID PRIMARY KEY REFERENCES nodes (id) ON DELETE CASCADE,
            efferent_coupling INTEGER NOT NULL DEFAULT 0,
            afferent_coupling INTEGER NOT NULL DEFAULT 0,
            page_rank DOUBLE PRECISION NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS edge_weights (
            edge_id UUID PRIMARY KEY REFERENCES edges (id) ON DELETE CASCADE,
            importance_score DOUBLE PRECISION NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS projects (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS memories (
            id UUID PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            tags TEXT[] NOT NULL DEFAULT '{}',
            author TEXT NOT NULL,
            project_id UUID REFERENCES projects (id) ON DELETE SET NULL,
            related_chunks UUID[] NOT NULL DEFAULT '{}',
            resource_links TEXT[] NOT NULL DEFAULT '{}',
            embedding VECTOR(768),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_title_project_alive
            ON memories (title, coalesce(project_id, '00000000-0000-0000-0000-000000000000'))
            WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_memories_project ON memories (project_id) WHERE deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS indexing_errors (
            id UUID PRIMARY KEY,
            repository TEXT NOT NULL,
            file_path TEXT NOT NULL,
            stage TEXT NOT NULL,
            message TEXT NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS idx_indexing_errors_repo ON indexing_errors (repository);
        ",
    )
    .execute(pool)
    .await
    .map_err(EngineError::from)?;
    Ok(())
}
