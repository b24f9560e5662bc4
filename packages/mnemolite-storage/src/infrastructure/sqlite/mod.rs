//! SQLite-backed `StorageGateway`: a hermetic adapter used by the test
//! suite (spec §8's properties and S1–S6) and by any local development flow
//! that doesn't want a running Postgres. Follows the crate's established
//! dual-backend (`sqlite`/`postgres` feature) shape; schema and query
//! *semantics* follow spec §3/§4 exactly, but trigram/vector scoring is
//! done in Rust (`infrastructure::trigram`, `infrastructure::vector_math`)
//! since SQLite has neither `pg_trgm` nor `pgvector`.
//!
//! Every call takes the single connection mutex synchronously — there is
//! no actual `.await` suspension inside any method. That's acceptable for
//! a test/dev backend fronting one process; the production `postgres`
//! backend is the one that matters for the concurrency model in spec §5.

mod schema;

use crate::domain::*;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGateway {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::apply(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
        let language: String = row.get("language")?;
        let chunk_type: String = row.get("chunk_type")?;
        let metadata: String = row.get("metadata")?;
        let embedding_text: Option<String> = row.get("embedding_text")?;
        let embedding_code: Option<String> = row.get("embedding_code")?;
        let indexed_at: String = row.get("indexed_at")?;
        Ok(Chunk {
            id: Uuid::parse_str(&row.get::<_, String>("id")?).unwrap(),
            repository: row.get("repository")?,
            file_path: row.get("file_path")?,
            language: parse_language(&language),
            chunk_type: parse_chunk_type(&chunk_type),
            name: row.get("name")?,
            name_path: row.get("name_path")?,
            source_code: row.get("source_code")?,
            start_line: row.get::<_, i64>("start_line")? as u32,
            end_line: row.get::<_, i64>("end_line")? as u32,
            metadata: serde_json::from_str(&metadata).unwrap_or(Json::Null),
            embedding_text: embedding_text.and_then(|s| serde_json::from_str(&s).ok()),
            embedding_code: embedding_code.and_then(|s| serde_json::from_str(&s).ok()),
            commit_hash: row.get("commit_hash")?,
            indexed_at: indexed_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        })
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

fn apply_chunk_filters(sql: &mut String, args: &mut Vec<String>, filters: &ChunkFilters) {
    if let Some(repo) = &filters.repository {
        sql.push_str(" AND repository = ?");
        args.push(repo.clone());
    }
    if let Some(fp) = &filters.file_path {
        sql.push_str(" AND file_path = ?");
        args.push(fp.clone());
    }
    if let Some(lang) = filters.language {
        sql.push_str(" AND language = ?");
        args.push(language_str(lang).to_string());
    }
    if let Some(ct) = filters.chunk_type {
        sql.push_str(" AND chunk_type = ?");
        args.push(chunk_type_str(ct).to_string());
    }
    if let Some(rt) = &filters.return_type {
        sql.push_str(" AND id IN (SELECT chunk_id FROM detailed_metadata WHERE return_type = ?)");
        args.push(rt.clone());
    }
    if let Some(pt) = &filters.param_type {
        sql.push_str(
            " AND id IN (SELECT dm.chunk_id FROM detailed_metadata dm, json_each(dm.parameters) je \
              WHERE json_extract(je.value, '$.type') = ?)",
        );
        args.push(pt.clone());
    }
}

#[async_trait]
impl StorageGateway for SqliteGateway {
    async fn add_chunk(&self, chunk: &Chunk) -> Result<Uuid> {
        let conn = self.conn.lock();
        insert_chunk(&conn, chunk)?;
        Ok(chunk.id)
    }

    async fn get_chunks(&self, repository: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM chunks WHERE repository = ?1")?;
        let rows = stmt
            .query_map(params![repository], Self::row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get_chunks_for_file(&self, repository: &str, file_path: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM chunks WHERE repository = ?1 AND file_path = ?2")?;
        let rows = stmt
            .query_map(params![repository, file_path], Self::row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn delete_by_repository(&self, repository: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM chunks WHERE repository = ?1", params![repository])?;
        Ok(n as u64)
    }

    async fn delete_by_file(&self, repository: &str, file_path: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM chunks WHERE repository = ?1 AND file_path = ?2",
            params![repository, file_path],
        )?;
        Ok(n as u64)
    }

    async fn count_chunks(&self, repository: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE repository = ?1",
            params![repository],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    async fn replace_file_chunks(
        &self,
        repository: &str,
        file_path: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE repository = ?1 AND file_path = ?2",
            params![repository, file_path],
        )?;
        for chunk in &chunks {
            insert_chunk(&tx, chunk)?;
        }
        tx.commit()?;
        Ok(chunks.len())
    }

    async fn upsert_node(&self, node: &Node) -> Result<Uuid> {
        let conn = self.conn.lock();
        insert_node(&conn, node)?;
        Ok(node.id)
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<Uuid> {
        let conn = self.conn.lock();
        insert_edge(&conn, edge)?;
        Ok(edge.id)
    }

    async fn get_nodes(&self, repository: &str) -> Result<Vec<Node>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, node_type, label, properties, created_at FROM nodes WHERE repository = ?1",
        )?;
        let rows = stmt
            .query_map(params![repository], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get_edges(&self, repository: &str) -> Result<Vec<Edge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source_node_id, target_node_id, relation_type, properties, created_at \
             FROM edges WHERE repository = ?1",
        )?;
        let rows = stmt
            .query_map(params![repository], row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, node_type, label, properties, created_at FROM nodes WHERE id = ?1",
            params![id.to_string()],
            row_to_node,
        )
        .optional()
        .map_err(EngineError::from)
    }

    async fn get_outbound_edges(&self, node_id: Uuid) -> Result<Vec<Edge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source_node_id, target_node_id, relation_type, properties, created_at \
             FROM edges WHERE source_node_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![node_id.to_string()], row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get_inbound_edges(&self, node_id: Uuid) -> Result<Vec<Edge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source_node_id, target_node_id, relation_type, properties, created_at \
             FROM edges WHERE target_node_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![node_id.to_string()], row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn write_graph_batch(
        &self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        _edge_batch_size: usize,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for node in &nodes {
            insert_node(&tx, node)?;
        }
        for edge in &edges {
            insert_edge(&tx, edge)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn put_detailed_metadata(&self, meta: &DetailedMetadata) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO detailed_metadata \
             (node_id, chunk_id, parameters, return_type, is_async, cyclomatic, lines_of_code, call_contexts) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                meta.node_id.to_string(),
                meta.chunk_id.to_string(),
                serde_json::to_string(&meta.parameters)?,
                meta.return_type,
                meta.is_async as i64,
                meta.cyclomatic as i64,
                meta.lines_of_code as i64,
                serde_json::to_string(&meta.call_contexts)?,
            ],
        )?;
        Ok(())
    }

    async fn put_computed_metrics(&self, node_id: Uuid, metrics: ComputedMetrics) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO computed_metrics \
             (node_id, efferent_coupling, afferent_coupling, page_rank) VALUES (?1, ?2, ?3, ?4)",
            params![
                node_id.to_string(),
                metrics.efferent_coupling as i64,
                metrics.afferent_coupling as i64,
                metrics.page_rank,
            ],
        )?;
        Ok(())
    }

    async fn delete_graph_for_repository(&self, repository: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM computed_metrics WHERE node_id IN (SELECT id FROM nodes WHERE repository = ?1)",
            params![repository],
        )?;
        tx.execute(
            "DELETE FROM detailed_metadata WHERE node_id IN (SELECT id FROM nodes WHERE repository = ?1)",
            params![repository],
        )?;
        tx.execute("DELETE FROM edges WHERE repository = ?1", params![repository])?;
        tx.execute("DELETE FROM nodes WHERE repository = ?1", params![repository])?;
        tx.commit()?;
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
        let conn = self.conn.lock();
        let mut sql = String::from("SELECT id, source_code, name, indexed_at FROM chunks WHERE 1=1");
        let mut args = Vec::new();
        apply_chunk_filters(&mut sql, &mut args, filters);
        let mut stmt = conn.prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> =
            args.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let mut candidates: Vec<(Uuid, f32, String)> = stmt
            .query_map(arg_refs.as_slice(), |row| {
                let id: String = row.get(0)?;
                let source_code: String = row.get(1)?;
                let name: Option<String> = row.get(2)?;
                let indexed_at: String = row.get(3)?;
                let haystack = name.unwrap_or_default() + " " + &source_code;
                let score = crate::infrastructure::trigram::similarity(query, &haystack);
                Ok((Uuid::parse_str(&id).unwrap(), score, indexed_at))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        candidates.retain(|(_, score, _)| *score >= threshold);
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap()
                .then_with(|| b.2.cmp(&a.2))
        });
        candidates.truncate(limit);
        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(i, (chunk_id, score, _))| LexicalHit {
                chunk_id,
                score,
                rank: (i + 1) as u32,
            })
            .collect())
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        domain: EmbeddingDomain,
        filters: &ChunkFilters,
        _ef_search: u32,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let conn = self.conn.lock();
        let column = match domain {
            EmbeddingDomain::Text => "embedding_text",
            EmbeddingDomain::Code => "embedding_code",
        };
        let mut sql = format!("SELECT id, {column} FROM chunks WHERE {column} IS NOT NULL");
        let mut args = Vec::new();
        apply_chunk_filters(&mut sql, &mut args, filters);
        let mut stmt = conn.prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> =
            args.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let mut candidates: Vec<(Uuid, f32)> = Vec::new();
        let mut rows = stmt.query(arg_refs.as_slice())?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let embedding: String = row.get(1)?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding).unwrap_or_default();
            if embedding.len() != vector.len() {
                return Err(EngineError::invalid_argument(format!(
                    "vector dimension mismatch: expected {}, got {}",
                    embedding.len(),
                    vector.len()
                )));
            }
            let distance = crate::infrastructure::vector_math::cosine_distance(vector, &embedding);
            candidates.push((Uuid::parse_str(&id).unwrap(), distance));
        }
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(limit);
        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(i, (chunk_id, distance))| VectorHit {
                chunk_id,
                distance,
                rank: (i + 1) as u32,
            })
            .collect())
    }

    async fn count_by_filter(&self, filters: &ChunkFilters) -> Result<u64> {
        let conn = self.conn.lock();
        let mut sql = String::from("SELECT COUNT(*) FROM chunks WHERE 1=1");
        let mut args = Vec::new();
        apply_chunk_filters(&mut sql, &mut args, filters);
        let arg_refs: Vec<&dyn rusqlite::ToSql> =
            args.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let n: i64 = conn.query_row(&sql, arg_refs.as_slice(), |r| r.get(0))?;
        Ok(n as u64)
    }

    async fn create_memory(&self, memory: &Memory) -> Result<Uuid> {
        let conn = self.conn.lock();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM memories WHERE title = ?1 AND deleted_at IS NULL \
                 AND ((project_id IS NULL AND ?2 IS NULL) OR project_id = ?2)",
                params![memory.title, memory.project_id.map(|p| p.to_string())],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(EngineError::conflict(format!(
                "memory titled '{}' already exists in this project",
                memory.title
            )));
        }
        conn.execute(
            "INSERT INTO memories (id, title, content, memory_type, tags, author, project_id, \
             related_chunks, resource_links, embedding, created_at, updated_at, deleted_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,NULL)",
            params![
                memory.id.to_string(),
                memory.title,
                memory.content,
                memory_type_str(memory.memory_type),
                serde_json::to_string(&memory.tags)?,
                memory.author,
                memory.project_id.map(|p| p.to_string()),
                serde_json::to_string(&memory.related_chunks)?,
                serde_json::to_string(&memory.resource_links)?,
                memory.embedding.as_ref().map(|e| serde_json::to_string(e).unwrap()),
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(memory.id)
    }

    async fn get_memory(&self, id: Uuid) -> Result<Option<Memory>> {
        let m = self.get_memory_including_deleted(id).await?;
        Ok(m.filter(|m| m.is_visible()))
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
        memory.updated_at = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memories SET title=?2, content=?3, memory_type=?4, tags=?5, \
             related_chunks=?6, resource_links=?7, embedding=?8, updated_at=?9 WHERE id=?1",
            params![
                id.to_string(),
                memory.title,
                memory.content,
                memory_type_str(memory.memory_type),
                serde_json::to_string(&memory.tags)?,
                serde_json::to_string(&memory.related_chunks)?,
                serde_json::to_string(&memory.resource_links)?,
                memory.embedding.as_ref().map(|e| serde_json::to_string(e).unwrap()),
                memory.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn soft_delete_memory(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE memories SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            return Err(EngineError::not_found(format!("memory {id}")));
        }
        Ok(())
    }

    async fn delete_memory_permanently(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        let deleted_at: Option<String> = conn
            .query_row(
                "SELECT deleted_at FROM memories WHERE id = ?1",
                params![id.to_string()],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| EngineError::not_found(format!("memory {id}")))?;
        if deleted_at.is_none() {
            return Err(EngineError::invalid_argument(
                "cannot permanently delete a memory that was never soft-deleted",
            ));
        }
        conn.execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    async fn get_memory_including_deleted(&self, id: Uuid) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM memories WHERE id = ?1",
            params![id.to_string()],
            row_to_memory,
        )
        .optional()
        .map_err(EngineError::from)
    }

    async fn list_memories(
        &self,
        filters: &MemoryListFilters,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Memory>, u64)> {
        let conn = self.conn.lock();
        let mut sql = String::from("SELECT * FROM memories WHERE 1=1");
        if !filters.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        let mut args: Vec<String> = Vec::new();
        if let Some(pid) = filters.project_id {
            sql.push_str(" AND project_id = ?");
            args.push(pid.to_string());
        }
        if let Some(mt) = filters.memory_type {
            sql.push_str(" AND memory_type = ?");
            args.push(memory_type_str(mt).to_string());
        }
        if let Some(author) = &filters.author {
            sql.push_str(" AND author = ?");
            args.push(author.clone());
        }
        let arg_refs: Vec<&dyn rusqlite::ToSql> =
            args.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let mut stmt = conn.prepare(&format!("{sql} ORDER BY created_at DESC"))?;
        let mut all = stmt
            .query_map(arg_refs.as_slice(), row_to_memory)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if !filters.tags.is_empty() {
            let wanted: HashSet<&str> = filters.tags.iter().map(|s| s.as_str()).collect();
            all.retain(|m| m.tags.iter().any(|t| wanted.contains(t.as_str())));
        }
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
                let emb = m.embedding.as_ref()?;
                if emb.len() != vector.len() {
                    return None;
                }
                let d = crate::infrastructure::vector_math::cosine_distance(vector, emb);
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
        let conn = self.conn.lock();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM projects WHERE lower(name) = lower(?1)",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(Uuid::parse_str(&id).unwrap());
        }
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), name, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    async fn record_indexing_error(
        &self,
        repository: &str,
        file_path: &str,
        stage: &str,
        message: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO indexing_errors (id, repository, file_path, stage, message, occurred_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                repository,
                file_path,
                stage,
                message,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn insert_chunk(conn: &Connection, chunk: &Chunk) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chunks (id, repository, file_path, language, chunk_type, name, name_path, \
         source_code, start_line, end_line, metadata, embedding_text, embedding_code, \
         commit_hash, indexed_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
        params![
            chunk.id.to_string(),
            chunk.repository,
            chunk.file_path,
            language_str(chunk.language),
            chunk_type_str(chunk.chunk_type),
            chunk.name,
            chunk.name_path,
            chunk.source_code,
            chunk.start_line as i64,
            chunk.end_line as i64,
            serde_json::to_string(&chunk.metadata).unwrap_or_default(),
            chunk.embedding_text.as_ref().map(|e| serde_json::to_string(e).unwrap()),
            chunk.embedding_code.as_ref().map(|e| serde_json::to_string(e).unwrap()),
            chunk.commit_hash,
            chunk.indexed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_node(conn: &Connection, node: &Node) -> rusqlite::Result<()> {
    let repository = node.repository().unwrap_or_default().to_string();
    conn.execute(
        "INSERT OR REPLACE INTO nodes (id, repository, node_type, label, properties, created_at) \
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            node.id.to_string(),
            repository,
            node_type_str(node.node_type),
            node.label,
            serde_json::to_string(&node.properties).unwrap_or_default(),
            node.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_edge(conn: &Connection, edge: &Edge) -> rusqlite::Result<()> {
    let repository: String = conn
        .query_row(
            "SELECT repository FROM nodes WHERE id = ?1",
            params![edge.source_node_id.to_string()],
            |r| r.get(0),
        )
        .unwrap_or_default();
    conn.execute(
        "INSERT OR IGNORE INTO edges (id, repository, source_node_id, target_node_id, \
         relation_type, properties, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            edge.id.to_string(),
            repository,
            edge.source_node_id.to_string(),
            edge.target_node_id.to_string(),
            relation_type_str(edge.relation_type),
            serde_json::to_string(&edge.properties).unwrap_or_default(),
            edge.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let node_type: String = row.get(1)?;
    let properties: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(Node {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        node_type: parse_node_type(&node_type),
        label: row.get(2)?,
        properties: serde_json::from_str(&properties).unwrap_or(Json::Null),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    let relation_type: String = row.get(3)?;
    let properties: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(Edge {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        source_node_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap(),
        target_node_id: Uuid::parse_str(&row.get::<_, String>(2)?).unwrap(),
        relation_type: parse_relation_type(&relation_type),
        properties: serde_json::from_str(&properties).unwrap_or(Json::Null),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
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

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let memory_type: String = row.get("memory_type")?;
    let tags: String = row.get("tags")?;
    let project_id: Option<String> = row.get("project_id")?;
    let related_chunks: String = row.get("related_chunks")?;
    let resource_links: String = row.get("resource_links")?;
    let embedding: Option<String> = row.get("embedding")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let deleted_at: Option<String> = row.get("deleted_at")?;
    Ok(Memory {
        id: Uuid::parse_str(&row.get::<_, String>("id")?).unwrap(),
        title: row.get("title")?,
        content: row.get("content")?,
        memory_type: parse_memory_type(&memory_type),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        author: row.get("author")?,
        project_id: project_id.and_then(|s| Uuid::parse_str(&s).ok()),
        related_chunks: serde_json::from_str(&related_chunks).unwrap_or_default(),
        resource_links: serde_json::from_str(&resource_links).unwrap_or_default(),
        embedding: embedding.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
        deleted_at: deleted_at.and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(repo: &str, file: &str, name: &str, start: u32, end: u32) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            repository: repo.into(),
            file_path: file.into(),
            language: Language::TypeScript,
            chunk_type: ChunkType::Function,
            name: Some(name.into()),
            name_path: name.into(),
            source_code: format!("function {name}() {{}}"),
            start_line: start,
            end_line: end,
            metadata: serde_json::json!({}),
            embedding_text: None,
            embedding_code: None,
            commit_hash: None,
            indexed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_and_get_chunks_round_trip() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let c = sample_chunk("demo", "user.ts", "validateUser", 1, 3);
        gw.add_chunk(&c).await.unwrap();
        let got = gw.get_chunks("demo").await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name.as_deref(), Some("validateUser"));
    }

    #[tokio::test]
    async fn replace_file_chunks_is_atomic_delete_then_insert() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let c1 = sample_chunk("demo", "a.ts", "f1", 1, 2);
        gw.add_chunk(&c1).await.unwrap();
        let c2 = sample_chunk("demo", "a.ts", "f2", 1, 5);
        gw.replace_file_chunks("demo", "a.ts", vec![c2]).await.unwrap();
        let got = gw.get_chunks_for_file("demo", "a.ts").await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name.as_deref(), Some("f2"));
    }

    #[tokio::test]
    async fn trigram_search_rejects_empty_query() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let err = gw
            .trigram_search("", &ChunkFilters::default(), 0.1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn vector_search_rejects_dimension_mismatch() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let mut c = sample_chunk("demo", "a.ts", "f", 1, 2);
        c.embedding_code = Some(vec![0.1, 0.2, 0.3]);
        gw.add_chunk(&c).await.unwrap();
        let err = gw
            .vector_search(&[0.1, 0.2], EmbeddingDomain::Code, &ChunkFilters::default(), 100, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn count_by_filter_matches_return_type_and_param_type() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let c1 = sample_chunk("demo", "a.ts", "parse", 1, 2);
        let c2 = sample_chunk("demo", "b.ts", "render", 1, 2);
        gw.add_chunk(&c1).await.unwrap();
        gw.add_chunk(&c2).await.unwrap();

        gw.put_detailed_metadata(&DetailedMetadata {
            node_id: Uuid::new_v4(),
            chunk_id: c1.id,
            parameters: vec![serde_json::json!({"name": "input", "type": "string"})],
            return_type: Some("boolean".to_string()),
            is_async: false,
            cyclomatic: 2,
            lines_of_code: 2,
            call_contexts: vec![],
        })
        .await
        .unwrap();
        gw.put_detailed_metadata(&DetailedMetadata {
            node_id: Uuid::new_v4(),
            chunk_id: c2.id,
            parameters: vec![serde_json::json!({"name": "el", "type": "HTMLElement"})],
            return_type: Some("void".to_string()),
            is_async: false,
            cyclomatic: 1,
            lines_of_code: 2,
            call_contexts: vec![],
        })
        .await
        .unwrap();

        let by_return = gw
            .count_by_filter(&ChunkFilters {
                return_type: Some("boolean".to_string()),
                ..ChunkFilters::default()
            })
            .await
            .unwrap();
        assert_eq!(by_return, 1);

        let by_param = gw
            .count_by_filter(&ChunkFilters {
                param_type: Some("HTMLElement".to_string()),
                ..ChunkFilters::default()
            })
            .await
            .unwrap();
        assert_eq!(by_param, 1);

        let no_match = gw
            .count_by_filter(&ChunkFilters {
                return_type: Some("nonexistent".to_string()),
                ..ChunkFilters::default()
            })
            .await
            .unwrap();
        assert_eq!(no_match, 0);
    }

    #[tokio::test]
    async fn memory_soft_delete_then_permanent_delete() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let m = Memory {
            id: Uuid::new_v4(),
            title: "t".into(),
            content: "c".into(),
            memory_type: MemoryType::Note,
            tags: Default::default(),
            author: "a".into(),
            project_id: None,
            related_chunks: Default::default(),
            resource_links: vec![],
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        gw.create_memory(&m).await.unwrap();

        let err = gw.delete_memory_permanently(m.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        gw.soft_delete_memory(m.id).await.unwrap();
        assert!(gw.get_memory(m.id).await.unwrap().is_none());

        gw.delete_memory_permanently(m.id).await.unwrap();
        assert!(gw.get_memory_including_deleted(m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_memory_title_in_same_project_conflicts() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let base = Memory {
            id: Uuid::new_v4(),
            title: "dup".into(),
            content: "c".into(),
            memory_type: MemoryType::Note,
            tags: Default::default(),
            author: "a".into(),
            project_id: None,
            related_chunks: Default::default(),
            resource_links: vec![],
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        gw.create_memory(&base).await.unwrap();
        let mut dup = base.clone();
        dup.id = Uuid::new_v4();
        let err = gw.create_memory(&dup).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}
