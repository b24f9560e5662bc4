//! PostgreSQL-backed `StorageGateway` (spec §4.1, production backend).
//! Uses `sqlx` for pooling/queries and `pgvector` for the embedding
//! columns; trigram scoring is pushed into SQL via the `pg_trgm` extension
//! (`similarity()` + `%` operator + `gin_trgm_ops` GIN indexes) and vector
//! scoring via `pgvector`'s `<=>` cosine-distance operator with an HNSW
//! index, matching the SQLite adapter's Rust-side fallbacks exactly in
//! semantics (same normalisation, same distance function).

mod schema;

use crate::domain::*;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(EngineError::from)?;
        schema::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn chunk_type_str(t: ChunkType) -> &'static str {
    match t {
        ChunkType::Function => "function",
        ChunkType::Method => "method",
        ChunkType::Class => "class",
        ChunkType::Interface => "interface",
        ChunkType::Module => "module",
        ChunkType::FallbackBlock => "fallback_block",
    }
}

fn parse_chunk_type(s: &str) -> ChunkType {
    match s {
        "function" => ChunkType::Function,
        "method" => ChunkType::Method,
        "class" => ChunkType::Class,
        "interface" => ChunkType::Interface,
        "module" => ChunkType::Module,
        _ => ChunkType::FallbackBlock,
    }
}

fn language_str(l: Language) -> &'static str {
    match l {
        Language::Python => "python",
        Language::TypeScript => "typescript",
        Language::JavaScript => "javascript",
        Language::Rust => "rust",
        Language::Go => "go",
        Language::Java => "java",
    }
}

fn parse_language(s: &str) -> Language {
    match s {
        "python" => Language::Python,
        "typescript" => Language::TypeScript,
        "javascript" => Language::JavaScript,
        "rust" => Language::Rust,
        "go" => Language::Go,
        _ => Language::Java,
    }
}

fn node_type_str(t: NodeType) -> &'static str {
    match t {
        NodeType::Module => "Module",
        NodeType::Function => "Function",
        NodeType::Class => "Class",
        NodeType::Method => "Method",
        NodeType::External => "External",
    }
}

fn parse_node_type(s: &str) -> NodeType {
    match s {
        "Module" => NodeType::Module,
        "Function" => NodeType::Function,
        "Class" => NodeType::Class,
        "Method" => NodeType::Method,
        _ => NodeType::External,
    }
}

fn relation_type_str(t: RelationType) -> &'static str {
    match t {
        RelationType::Calls => "calls",
        RelationType::Imports => "imports",
        RelationType::Inherits => "inherits",
        RelationType::Contains => "contains",
        RelationType::References => "references",
    }
}

fn parse_relation_type(s: &str) -> RelationType {
    match s {
        "calls" => RelationType::Calls,
        "imports" => RelationType::Imports,
        "inherits" => RelationType::Inherits,
        "contains" => RelationType::Contains,
        _ => RelationType::References,
    }
}

fn memory_type_str(t: MemoryType) -> &'static str {
    match t {
        MemoryType::Note => "note",
        MemoryType::Decision => "decision",
        MemoryType::Task => "task",
        MemoryType::Reference => "reference",
        MemoryType::Conversation => "conversation",
    }
}

fn parse_memory_type(s: &str) -> MemoryType {
    match s {
        "decision" => MemoryType::Decision,
        "task" => MemoryType::Task,
        "reference" => MemoryType::Reference,
        "conversation" => MemoryType::Conversation,
        _ => MemoryType::Note,
    }
}

fn chunk_from_row(row: &sqlx::postgres::PgRow) -> Result<Chunk> {
    let embedding_text: Option<Vector> = row.try_get("embedding_text").map_err(EngineError::from)?;
    let embedding_code: Option<Vector> = row.try_get("embedding_code").map_err(EngineError::from)?;
    Ok(Chunk {
        id: row.try_get("id").map_err(EngineError::from)?,
        repository: row.try_get("repository").map_err(EngineError::from)?,
        file_path: row.try_get("file_path").map_err(EngineError::from)?,
        language: parse_language(row.try_get::<String, _>("language").map_err(EngineError::from)?.as_str()),
        chunk_type: parse_chunk_type(row.try_get::<String, _>("chunk_type").map_err(EngineError::from)?.as_str()),
        name: row.try_get("name").map_err(EngineError::from)?,
        name_path: row.try_get("name_path").map_err(EngineError::from)?,
        source_code: row.try_get("source_code").map_err(EngineError::from)?,
        start_line: row.try_get::<i32, _>("start_line").map_err(EngineError::from)? as u32,
        end_line: row.try_get::<i32, _>("end_line").map_err(EngineError::from)? as u32,
        metadata: row.try_get("metadata").map_err(EngineError::from)?,
        embedding_text: embedding_text.map(|v| v.to_vec()),
        embedding_code: embedding_code.map(|v| v.to_vec()),
        commit_hash: row.try_get("commit_hash").map_err(EngineError::from)?,
        indexed_at: row.try_get("indexed_at").map_err(EngineError::from)?,
    })
}

fn apply_chunk_filters<'a>(
    sql: &mut String,
    binds: &mut Vec<String>,
    filters: &'a ChunkFilters,
    mut next_idx: usize,
) -> usize {
    if let Some(repo) = &filters.repository {
        sql.push_str(&format!(" AND repository = ${next_idx}"));
        binds.push(repo.clone());
        next_idx += 1;
    }
    if let Some(fp) = &filters.file_path {
        sql.push_str(&format!(" AND file_path = ${next_idx}"));
        binds.push(fp.clone());
        next_idx += 1;
    }
    if let Some(lang) = filters.language {
        sql.push_str(&format!(" AND language = ${next_idx}"));
        binds.push(language_str(lang).to_string());
        next_idx += 1;
    }
    if let Some(ct) = filters.chunk_type {
        sql.push_str(&format!(" AND chunk_type = ${next_idx}"));
        binds.push(chunk_type_str(ct).to_string());
        next_idx += 1;
    }
    if let Some(rt) = &filters.return_type {
        sql.push_str(&format!(
            " AND id IN (SELECT chunk_id FROM detailed_metadata WHERE return_type = ${next_idx})"
        ));
        binds.push(rt.clone());
        next_idx += 1;
    }
    if let Some(pt) = &filters.param_type {
        sql.push_str(&format!(
            " AND id IN (SELECT dm.chunk_id FROM detailed_metadata dm, \
              jsonb_array_elements(dm.parameters) AS elem WHERE elem->>'type' = ${next_idx})"
        ));
        binds.push(pt.clone());
        next_idx += 1;
    }
    next_idx
}

#[async_trait]
impl StorageGateway for PostgresGateway {
    async fn add_chunk(&self, chunk: &Chunk) -> Result<Uuid> {
        sqlx::query(
            "INSERT INTO chunks (id, repository, file_path, language, chunk_type, name, \
             name_path, source_code, start_line, end_line, metadata, embedding_text, \
             embedding_code, commit_hash, indexed_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(chunk.id)
        .bind(&chunk.repository)
        .bind(&chunk.file_path)
        .bind(language_str(chunk.language))
        .bind(chunk_type_str(chunk.chunk_type))
        .bind(&chunk.name)
        .bind(&chunk.name_path)
        .bind(&chunk.source_code)
        .bind(chunk.start_line as i32)
        .bind(chunk.end_line as i32)
        .bind(&chunk.metadata)
        .bind(chunk.embedding_text.clone().map(Vector::from))
        .bind(chunk.embedding_code.clone().map(Vector::from))
        .bind(&chunk.commit_hash)
        .bind(chunk.indexed_at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(chunk.id)
    }

    async fn get_chunks(&self, repository: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE repository = $1")
            .bind(repository)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::from)?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn get_chunks_for_file(&self, repository: &str, file_path: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE repository = $1 AND file_path = $2")
            .bind(repository)
            .bind(file_path)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::from)?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn delete_by_repository(&self, repository: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM chunks WHERE repository = $1")
            .bind(repository)
            .execute(&self.pool)
            .await
            .map_err(EngineError::from)?;
        Ok(res.rows_affected())
    }

    async fn delete_by_file(&self, repository: &str, file_path: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM chunks WHERE repository = $1 AND file_path = $2")
            .bind(repository)
            .bind(file_path)
            .execute(&self.pool)
            .await
            .map_err(EngineError::from)?;
        Ok(res.rows_affected())
    }

    async fn count_chunks(&self, repository: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE repository = $1")
            .bind(repository)
            .fetch_one(&self.pool)
            .await
            .map_err(EngineError::from)?;
        let n: i64 = row.try_get("n").map_err(EngineError::from)?;
        Ok(n as u64)
    }

    async fn replace_file_chunks(
        &self,
        repository: &str,
        file_path: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(EngineError::from)?;
        sqlx::query("DELETE FROM chunks WHERE repository = $1 AND file_path = $2")
            .bind(repository)
            .bind(file_path)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::from)?;
        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO chunks (id, repository, file_path, language, chunk_type, name, \
                 name_path, source_code, start_line, end_line, metadata, embedding_text, \
                 embedding_code, commit_hash, indexed_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
            )
            .bind(chunk.id)
            .bind(&chunk.repository)
            .bind(&chunk.file_path)
            .bind(language_str(chunk.language))
            .bind(chunk_type_str(chunk.chunk_type))
            .bind(&chunk.name)
            .bind(&chunk.name_path)
            .bind(&chunk.source_code)
            .bind(chunk.start_line as i32)
            .bind(chunk.end_line as i32)
            .bind(&chunk.metadata)
            .bind(chunk.embedding_text.clone().map(Vector::from))
            .bind(chunk.embedding_code.clone().map(Vector::from))
            .bind(&chunk.commit_hash)
            .bind(chunk.indexed_at)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::from)?;
        }
        tx.commit().await.map_err(EngineError::from)?;
        Ok(chunks.len())
    }

    async fn upsert_node(&self, node: &Node) -> Result<Uuid> {
        sqlx::query(
            "INSERT INTO nodes (id, repository, node_type, label, properties, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6) \
             ON CONFLICT (id) DO UPDATE SET label = EXCLUDED.label, properties = EXCLUDED.properties",
        )
        .bind(node.id)
        .bind(node.repository().unwrap_or_default())
        .bind(node_type_str(node.node_type))
        .bind(&node.label)
        .bind(&node.properties)
        .bind(node.created_at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(node.id)
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<Uuid> {
        let repository: Option<String> = sqlx::query_scalar("SELECT repository FROM nodes WHERE id = $1")
            .bind(edge.source_node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::from)?;
        sqlx::query(
            "INSERT INTO edges (id, repository, source_node_id, target_node_id, relation_type, \
             properties, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7) \
             ON CONFLICT (source_node_id, target_node_id, relation_type) DO NOTHING",
        )
        .bind(edge.id)
        .bind(repository.unwrap_or_default())
        .bind(edge.source_node_id)
        .bind(edge.target_node_id)
        .bind(relation_type_str(edge.relation_type))
        .bind(&edge.properties)
        .bind(edge.created_at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(edge.id)
    }

    async fn get_nodes(&self, repository: &str) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT id, node_type, label, properties, created_at FROM nodes WHERE repository = $1",
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)?;
        rows.iter().map(node_from_row).collect()
    }

    async fn get_edges(&self, repository: &str) -> Result<Vec<Edge>> {
        let rows = sqlx::query(
            "SELECT id, source_node_id, target_node_id, relation_type, properties, created_at \
             FROM edges WHERE repository = $1",
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        let row = sqlx::query("SELECT id, node_type, label, properties, created_at FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::from)?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn get_outbound_edges(&self, node_id: Uuid) -> Result<Vec<Edge>> {
        let rows = sqlx::query(
            "SELECT id, source_node_id, target_node_id, relation_type, properties, created_at \
             FROM edges WHERE source_node_id = $1",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn get_inbound_edges(&self, node_id: Uuid) -> Result<Vec<Edge>> {
        let rows = sqlx::query(
            "SELECT id, source_node_id, target_node_id, relation_type, properties, created_at \
             FROM edges WHERE target_node_id = $1",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn write_graph_batch(
        &self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        edge_batch_size: usize,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(EngineError::from)?;
        for node in &nodes {
            sqlx::query(
                "INSERT INTO nodes (id, repository, node_type, label, properties, created_at) \
                 VALUES ($1,$2,$3,$4,$5,$6) \
                 ON CONFLICT (id) DO UPDATE SET label = EXCLUDED.label, properties = EXCLUDED.properties",
            )
            .bind(node.id)
            .bind(node.repository().unwrap_or_default())
            .bind(node_type_str(node.node_type))
            .bind(&node.label)
            .bind(&node.properties)
            .bind(node.created_at)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::from)?;
        }
        for batch in edges.chunks(edge_batch_size.max(1)) {
            for edge in batch {
                let repository: Option<String> =
                    sqlx::query_scalar("SELECT repository FROM nodes WHERE id = $1")
                        .bind(edge.source_node_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(EngineError::from)?;
                sqlx::query(
                    "INSERT INTO edges (id, repository, source_node_id, target_node_id, \
                     relation_type, properties, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7) \
                     ON CONFLICT (source_node_id, target_node_id, relation_type) DO NOTHING",
                )
                .bind(edge.id)
                .bind(repository.unwrap_or_default())
                .bind(edge.source_node_id)
                .bind(edge.target_node_id)
                .bind(relation_type_str(edge.relation_type))
                .bind(&edge.properties)
                .bind(edge.created_at)
                .execute(&mut *tx)
                .await
                .map_err(EngineError::from)?;
            }
        }
        tx.commit().await.map_err(EngineError::from)?;
        Ok(())
    }

    async fn put_detailed_metadata(&self, meta: &DetailedMetadata) -> Result<()> {
        sqlx::query(
            "INSERT INTO detailed_metadata (node_id, chunk_id, parameters, return_type, is_async, \
             cyclomatic, lines_of_code, call_contexts) VALUES ($1,$2,$3,$4,$5,$6,$7,$8) \
             ON CONFLICT (node_id) DO UPDATE SET parameters = EXCLUDED.parameters, \
             return_type = EXCLUDED.return_type, is_async = EXCLUDED.is_async, \
             cyclomatic = EXCLUDED.cyclomatic, lines_of_code = EXCLUDED.lines_of_code, \
             call_contexts = EXCLUDED.call_contexts",
        )
        .bind(meta.node_id)
        .bind(meta.chunk_id)
        .bind(serde_json::to_value(&meta.parameters)?)
        .bind(&meta.return_type)
        .bind(meta.is_async)
        .bind(meta.cyclomatic as i32)
        .bind(meta.lines_of_code as i32)
        .bind(serde_json::to_value(&meta.call_contexts)?)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(())
    }

    async fn put_computed_metrics(&self, node_id: Uuid, metrics: ComputedMetrics) -> Result<()> {
        sqlx::query(
            "INSERT INTO computed_metrics (node_id, efferent_coupling, afferent_coupling, page_rank) \
             VALUES ($1,$2,$3,$4) ON CONFLICT (node_id) DO UPDATE SET \
             efferent_coupling = EXCLUDED.efferent_coupling, \
             afferent_coupling = EXCLUDED.afferent_coupling, page_rank = EXCLUDED.page_rank",
        )
        .bind(node_id)
        .bind(metrics.efferent_coupling as i32)
        .bind(metrics.afferent_coupling as i32)
        .bind(metrics.page_rank)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(())
    }

    async fn delete_graph_for_repository(&self, repository: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(EngineError::from)?;
        sqlx::query(
            "DELETE FROM computed_metrics WHERE node_id IN (SELECT id FROM nodes WHERE repository = $1)",
        )
        .bind(repository)
        .execute(&mut *tx)
        .await
        .map_err(EngineError::from)?;
        sqlx::query(
            "DELETE FROM detailed_metadata WHERE node_id IN (SELECT id FROM nodes WHERE repository = $1)",
        )
        .bind(repository)
        .execute(&mut *tx)
        .await
        .map_err(EngineError::from)?;
        sqlx::query("DELETE FROM edges WHERE repository = $1")
            .bind(repository)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::from)?;
        sqlx::query("DELETE FROM nodes WHERE repository = $1")
            .bind(repository)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::from)?;
        tx.commit().await.map_err(EngineError::from)?;
        Ok(())
    }

    async fn trigram_search(
        &self,
        query: &str,
        filters: &ChunkFilters,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<LexicalHit>> {
        if query.is_empty() {
            return Err(EngineError::invalid_argument("lexical query must not be empty"));
        }
        let mut sql = String::from(
            "SELECT id, similarity(coalesce(name, '') || ' ' || source_code, $1) AS score \
             FROM chunks WHERE similarity(coalesce(name, '') || ' ' || source_code, $1) >= $2",
        );
        let mut binds = Vec::new();
        let next_idx = apply_chunk_filters(&mut sql, &mut binds, filters, 3);
        sql.push_str(&format!(" ORDER BY score DESC LIMIT ${next_idx}"));
        let mut q = sqlx::query(&sql).bind(query).bind(threshold);
        for b in &binds {
            q = q.bind(b);
        }
        q = q.bind(limit as i64);
        let rows = q.fetch_all(&self.pool).await.map_err(EngineError::from)?;
        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, row)| LexicalHit {
                chunk_id: row.get("id"),
                score: row.get::<f32, _>("score"),
                rank: (i + 1) as u32,
            })
            .collect())
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        domain: EmbeddingDomain,
        filters: &ChunkFilters,
        ef_search: u32,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let column = match domain {
            EmbeddingDomain::Text => "embedding_text",
            EmbeddingDomain::Code => "embedding_code",
        };
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", ef_search.max(1)))
            .execute(&self.pool)
            .await
            .map_err(EngineError::from)?;
        let mut sql = format!(
            "SELECT id, {column} <=> $1 AS distance FROM chunks WHERE {column} IS NOT NULL"
        );
        let mut binds = Vec::new();
        let next_idx = apply_chunk_filters(&mut sql, &mut binds, filters, 2);
        sql.push_str(&format!(" ORDER BY distance ASC LIMIT ${next_idx}"));
        let mut q = sqlx::query(&sql).bind(Vector::from(vector.to_vec()));
        for b in &binds {
            q = q.bind(b);
        }
        q = q.bind(limit as i64);
        let rows = q.fetch_all(&self.pool).await.map_err(EngineError::from)?;
        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, row)| VectorHit {
                chunk_id: row.get("id"),
                distance: row.get::<f32, _>("distance"),
                rank: (i + 1) as u32,
            })
            .collect())
    }

    async fn count_by_filter(&self, filters: &ChunkFilters) -> Result<u64> {
        let mut sql = String::from("SELECT COUNT(*) AS n FROM chunks WHERE 1=1");
        let mut binds = Vec::new();
        apply_chunk_filters(&mut sql, &mut binds, filters, 1);
        let mut q = sqlx::query(&sql);
        for b in &binds {
            q = q.bind(b);
        }
        let row = q.fetch_one(&self.pool).await.map_err(EngineError::from)?;
        let n: i64 = row.try_get("n").map_err(EngineError::from)?;
        Ok(n as u64)
    }

    async fn create_memory(&self, memory: &Memory) -> Result<Uuid> {
        sqlx::query(
            "INSERT INTO memories (id, title, content, memory_type, tags, author, project_id, \
             related_chunks, resource_links, embedding, created_at, updated_at, deleted_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,NULL)",
        )
        .bind(memory.id)
        .bind(&memory.title)
        .bind(&memory.content)
        .bind(memory_type_str(memory.memory_type))
        .bind(memory.tags.iter().cloned().collect::<Vec<_>>())
        .bind(&memory.author)
        .bind(memory.project_id)
        .bind(memory.related_chunks.iter().cloned().collect::<Vec<_>>())
        .bind(&memory.resource_links)
        .bind(memory.embedding.clone().map(Vector::from))
        .bind(memory.created_at)
        .bind(memory.updated_at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(memory.id)
    }

    async fn get_memory(&self, id: Uuid) -> Result<Option<Memory>> {
        Ok(self.get_memory_including_deleted(id).await?.filter(|m| m.is_visible()))
    }

    async fn update_memory(
        &self,
        id: Uuid,
        patch: &MemoryPatch,
        new_embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        let Some(mut memory) = self.get_memory_including_deleted(id).await? else {
            return Err(EngineError::not_found(format!("memory {id}")));
        };
        if let Some(title) = &patch.title {
            memory.title = title.clone();
        }
        if let Some(content) = &patch.content {
            memory.content = content.clone();
        }
        if let Some(mt) = patch.memory_type {
            memory.memory_type = mt;
        }
        if let Some(tags) = &patch.tags {
            memory.tags = tags.clone();
        }
        if let Some(rc) = &patch.related_chunks {
            memory.related_chunks = rc.clone();
        }
        if let Some(links) = &patch.resource_links {
            memory.resource_links = links.clone();
        }
        if let Some(embedding) = new_embedding {
            memory.embedding = Some(embedding);
        }
        let updated_at = chrono::Utc::now();
        sqlx::query(
            "UPDATE memories SET title=$2, content=$3, memory_type=$4, tags=$5, \
             related_chunks=$6, resource_links=$7, embedding=$8, updated_at=$9 WHERE id=$1",
        )
        .bind(id)
        .bind(&memory.title)
        .bind(&memory.content)
        .bind(memory_type_str(memory.memory_type))
        .bind(memory.tags.iter().cloned().collect::<Vec<_>>())
        .bind(memory.related_chunks.iter().cloned().collect::<Vec<_>>())
        .bind(&memory.resource_links)
        .bind(memory.embedding.clone().map(Vector::from))
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(())
    }

    async fn soft_delete_memory(&self, id: Uuid) -> Result<()> {
        let res = sqlx::query(
            "UPDATE memories SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        if res.rows_affected() == 0 {
            return Err(EngineError::not_found(format!("memory {id}")));
        }
        Ok(())
    }

    async fn delete_memory_permanently(&self, id: Uuid) -> Result<()> {
        let deleted_at: Option<chrono::DateTime<chrono::Utc>> =
            sqlx::query_scalar("SELECT deleted_at FROM memories WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(EngineError::from)?
                .ok_or_else(|| EngineError::not_found(format!("memory {id}")))?;
        if deleted_at.is_none() {
            return Err(EngineError::invalid_argument(
                "cannot permanently delete a memory that was never soft-deleted",
            ));
        }
        sqlx::query("DELETE FROM memories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(EngineError::from)?;
        Ok(())
    }

    async fn get_memory_including_deleted(&self, id: Uuid) -> Result<Option<Memory>> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::from)?;
        row.as_ref().map(memory_from_row).transpose()
    }

    async fn list_memories(
        &self,
        filters: &MemoryListFilters,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Memory>, u64)> {
        // Fixed bind positions, each guarded by "filter is NULL or matches" so the
        // query shape never depends on which filters are set.
        let memory_type = filters.memory_type.map(memory_type_str);
        let tags: Option<Vec<String>> = if filters.tags.is_empty() {
            None
        } else {
            Some(filters.tags.clone())
        };
        let rows = sqlx::query(
            "SELECT * FROM memories WHERE \
             ($1::boolean OR deleted_at IS NULL) AND \
             ($2::uuid IS NULL OR project_id = $2) AND \
             ($3::text IS NULL OR memory_type = $3) AND \
             ($4::text IS NULL OR author = $4) AND \
             ($5::text[] IS NULL OR tags && $5) \
             ORDER BY created_at DESC",
        )
        .bind(filters.include_deleted)
        .bind(filters.project_id)
        .bind(memory_type)
        .bind(&filters.author)
        .bind(tags)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from)?;
        let all: Vec<Memory> = rows.iter().map(memory_from_row).collect::<Result<_>>()?;
        let total = all.len() as u64;
        let page = all.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn search_memories_by_vector(
        &self,
        vector: &[f32],
        filters: &MemoryListFilters,
        limit: usize,
        distance_threshold: Option<f32>,
    ) -> Result<(Vec<Memory>, u64)> {
        let (all, _) = self.list_memories(filters, usize::MAX, 0).await?;
        let mut scored: Vec<(Memory, f32)> = all
            .into_iter()
            .filter_map(|m| {
                let emb = m.embedding.clone()?;
                if emb.len() != vector.len() {
                    return None;
                }
                let d = crate::infrastructure::vector_math::cosine_distance(vector, &emb);
                Some((m, d))
            })
            .filter(|(_, d)| distance_threshold.map(|t| *d <= t).unwrap_or(true))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let total = scored.len() as u64;
        let page = scored.into_iter().take(limit).map(|(m, _)| m).collect();
        Ok((page, total))
    }

    async fn ensure_project(&self, name: &str) -> Result<Uuid> {
        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM projects WHERE lower(name) = lower($1)")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(EngineError::from)?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO projects (id, name, created_at) VALUES ($1, $2, now())")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(EngineError::from)?;
        Ok(id)
    }

    async fn record_indexing_error(
        &self,
        repository: &str,
        file_path: &str,
        stage: &str,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO indexing_errors (id, repository, file_path, stage, message, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(Uuid::new_v4())
        .bind(repository)
        .bind(file_path)
        .bind(stage)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(EngineError::from)?;
        Ok(())
    }
}

fn node_from_row(row: &sqlx::postgres::PgRow) -> Result<Node> {
    Ok(Node {
        id: row.try_get("id").map_err(EngineError::from)?,
        node_type: parse_node_type(row.try_get::<String, _>("node_type").map_err(EngineError::from)?.as_str()),
        label: row.try_get("label").map_err(EngineError::from)?,
        properties: row.try_get("properties").map_err(EngineError::from)?,
        created_at: row.try_get("created_at").map_err(EngineError::from)?,
    })
}

fn edge_from_row(row: &sqlx::postgres::PgRow) -> Result<Edge> {
    Ok(Edge {
        id: row.try_get("id").map_err(EngineError::from)?,
        source_node_id: row.try_get("source_node_id").map_err(EngineError::from)?,
        target_node_id: row.try_get("target_node_id").map_err(EngineError::from)?,
        relation_type: parse_relation_type(
            row.try_get::<String, _>("relation_type").map_err(EngineError::from)?.as_str(),
        ),
        properties: row.try_get("properties").map_err(EngineError::from)?,
        created_at: row.try_get("created_at").map_err(EngineError::from)?,
    })
}

fn memory_from_row(row: &sqlx::postgres::PgRow) -> Result<Memory> {
    let tags: Vec<String> = row.try_get("tags").map_err(EngineError::from)?;
    let related_chunks: Vec<Uuid> = row.try_get("related_chunks").map_err(EngineError::from)?;
    let embedding: Option<Vector> = row.try_get("embedding").map_err(EngineError::from)?;
    Ok(Memory {
        id: row.try_get("id").map_err(EngineError::from)?,
        title: row.try_get("title").map_err(EngineError::from)?,
        content: row.try_get("content").map_err(EngineError::from)?,
        memory_type: parse_memory_type(row.try_get::<String, _>("memory_type").map_err(EngineError::from)?.as_str()),
        tags: tags.into_iter().collect(),
        author: row.try_get("author").map_err(EngineError::from)?,
        project_id: row.try_get("project_id").map_err(EngineError::from)?,
        related_chunks: related_chunks.into_iter().collect(),
        resource_links: row.try_get("resource_links").map_err(EngineError::from)?,
        embedding: embedding.map(|v| v.to_vec()),
        created_at: row.try_get("created_at").map_err(EngineError::from)?,
        updated_at: row.try_get("updated_at").map_err(EngineError::from)?,
        deleted_at: row.try_get("deleted_at").map_err(EngineError::from)?,
    })
}
