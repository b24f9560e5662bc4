//! DDL for the SQLite test backend. Mirrors the Postgres schema (spec §3)
//! minus the extension-backed bits (`VECTOR`, `GIN … gin_trgm_ops`): those
//! columns are plain JSON-as-TEXT here and scored in Rust instead
//! (`infrastructure::trigram`, `infrastructure::vector_math`).

use rusqlite::Connection;

pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            file_path TEXT NOT NULL,
            language TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            name TEXT,
            name_path TEXT NOT NULL,
            source_code TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            metadata TEXT NOT NULL,
            embedding_text TEXT,
            embedding_code TEXT,
            commit_hash TEXT,
            indexed_at TEXT NOT NULL,
            UNIQUE (repository, file_path, name_path, start_line)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_repo_file ON chunks (repository, file_path);

        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            node_type TEXT NOT NULL,
            label TEXT NOT NULL,
            properties TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_repo ON nodes (repository);

        CREATE TABLE IF NOT EXISTS edges (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            source_node_id TEXT NOT NULL,
            target_node_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            properties TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (source_node_id, target_node_id, relation_type)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_repo ON edges (repository);
        CREATE INDEX IF NOT EXISTS idx_edges_source ON edges (source_node_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (target_node_id);

        CREATE TABLE IF NOT EXISTS detailed_metadata (
            node_id TEXT PRIMARY KEY,
            chunk_id TEXT NOT NULL,
            parameters TEXT NOT NULL,
            return_type TEXT,
            is_async INTEGER NOT NULL,
            cyclomatic INTEGER NOT NULL,
            lines_of_code INTEGER NOT NULL,
            call_contexts TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS computed_metrics (
            node_id TEXT PRIMARY KEY,
            efferent_coupling INTEGER NOT NULL,
            afferent_coupling INTEGER NOT NULL,
            page_rank REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS edge_weights (
            edge_id TEXT PRIMARY KEY,
            importance_score REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            tags TEXT NOT NULL,
            author TEXT NOT NULL,
            project_id TEXT,
            related_chunks TEXT NOT NULL,
            resource_links TEXT NOT NULL,
            embedding TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memories_project ON memories (project_id);
        CREATE INDEX IF NOT EXISTS idx_memories_alive ON memories (deleted_at);

        CREATE TABLE IF NOT EXISTS indexing_errors (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            file_path TEXT NOT NULL,
            stage TEXT NOT NULL,
            message TEXT NOT NULL,
            occurred_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_indexing_errors_repo ON indexing_errors (repository);
        ",
    )
}
