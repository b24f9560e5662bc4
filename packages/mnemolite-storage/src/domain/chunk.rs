//! Chunk domain model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// Kind of a chunk as produced by the Chunker (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    Interface,
    Module,
    /// Produced by the fixed-line fallback windower when AST parsing fails.
    FallbackBlock,
}

/// Source language of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
    JavaScript,
    Rust,
    Go,
    Java,
}

impl Language {
    /// Canonical file extensions this language is selected for.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py"],
            Language::TypeScript => &["ts", "tsx"],
            Language::JavaScript => &["js", "jsx", "mjs"],
            Language::Rust => &["rs"],
            Language::Go => &["go"],
            Language::Java => &["java"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.');
        [
            Language::Python,
            Language::TypeScript,
            Language::JavaScript,
            Language::Rust,
            Language::Go,
            Language::Java,
        ]
        .into_iter()
        .find(|lang| lang.extensions().contains(&ext))
    }
}

/// A unit of indexed code (spec §3 "Chunk").
///
/// Invariants enforced by callers, not by this struct: `start_line <=
/// end_line`; when an embedding is `Some`, its length equals the
/// process-wide dimension `d`; `(repository, file_path, name_path,
/// start_line)` is unique within the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub repository: String,
    pub file_path: String,
    pub language: Language,
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub name_path: String,
    pub source_code: String,
    pub start_line: u32,
    pub end_line: u32,
    pub metadata: Json,
    pub embedding_text: Option<Vec<f32>>,
    pub embedding_code: Option<Vec<f32>>,
    pub commit_hash: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

impl Chunk {
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.chunk_type, ChunkType::FallbackBlock)
    }

    /// The unique business key spec §3 mandates for this entity.
    pub fn identity_key(&self) -> (String, String, String, u32) {
        (
            self.repository.clone(),
            self.file_path.clone(),
            self.name_path.clone(),
            self.start_line,
        )
    }
}

/// Filters shared by lexical (C8) and vector (C9) search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkFilters {
    pub language: Option<Language>,
    pub chunk_type: Option<ChunkType>,
    pub repository: Option<String>,
    pub file_path: Option<String>,
    pub return_type: Option<String>,
    pub param_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_count_is_inclusive() {
        let c = sample_chunk(10, 20);
        assert_eq!(c.line_count(), 11);
    }

    #[test]
    fn language_from_extension_round_trips() {
        assert_eq!(Language::from_extension("ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension(".py"), Some(Language::Python));
        assert_eq!(Language::from_extension("xyz"), None);
    }

    fn sample_chunk(start: u32, end: u32) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            repository: "demo".into(),
            file_path: "user.ts".into(),
            language: Language::TypeScript,
            chunk_type: ChunkType::Function,
            name: Some("validateUser".into()),
            name_path: "validateUser".into(),
            source_code: String::new(),
            start_line: start,
            end_line: end,
            metadata: serde_json::json!({}),
            embedding_text: None,
            embedding_code: None,
            commit_hash: None,
            indexed_at: Utc::now(),
        }
    }
}
