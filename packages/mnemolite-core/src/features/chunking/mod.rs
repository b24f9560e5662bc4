//! Chunker (C2, spec §4.2). Reuses the tree the parsing module already
//! built (`features::parsing`) for the AST path, and calls straight into
//! the Metadata Extractor (C3, `features::metadata`) per chunk so there is
//! exactly one walk of each chunk's sub-AST, as `SPEC_FULL.md` §4.3 requires.

use crate::features::metadata;
use crate::features::parsing::{self, node_text, syntax_for, LanguageSyntax};
use chrono::Utc;
use mnemolite_storage::domain::{Chunk, ChunkType, Language};
use serde_json::json;
use std::time::Duration;
use tree_sitter::Node;
use uuid::Uuid;

const AST_PARSE_DEADLINE: Duration = Duration::from_secs(10);
const FALLBACK_WINDOW_LINES: usize = 60;
const FALLBACK_OVERLAP_LINES: usize = 15;

pub struct ChunkingResult {
    pub chunks: Vec<Chunk>,
    pub used_fallback: bool,
}

/// `(source_bytes, language, file_path) -> chunks` (spec §4.2).
pub fn chunk_file(
    repository: &str,
    file_path: &str,
    language: Language,
    source: &str,
    commit_hash: Option<String>,
) -> ChunkingResult {
    if source.trim().is_empty() {
        return ChunkingResult {
            chunks: Vec::new(),
            used_fallback: false,
        };
    }

    match parsing::parse(language, source, AST_PARSE_DEADLINE) {
        Some(parsed) => {
            let syntax = syntax_for(language);
            let mut entries = Vec::new();
            collect(&parsed.tree.root_node(), source, syntax, None, &mut entries);
            let chunks = entries
                .into_iter()
                .map(|entry| build_ast_chunk(repository, file_path, language, source, syntax, entry, &commit_hash))
                .collect();
            ChunkingResult {
                chunks,
                used_fallback: false,
            }
        }
        None => ChunkingResult {
            chunks: fallback_windows(repository, file_path, language, source, &commit_hash),
            used_fallback: true,
        },
    }
}

struct Entry<'tree> {
    node: Node<'tree>,
    name: String,
    name_path: String,
    chunk_type: ChunkType,
}

/// Recursively classifies declarations (spec §4.2 step 2): one chunk per
/// function/method/class/interface; methods get `ClassName.methodName`.
/// Wrapper nodes (export statements, decorators) are transparently
/// descended into without being decorated themselves.
fn collect<'tree>(
    node: &Node<'tree>,
    source: &str,
    syntax: &LanguageSyntax,
    class_context: Option<&str>,
    out: &mut Vec<Entry<'tree>>,
) {
    let kind = node.kind();

    if syntax.class_kinds.contains(&kind) {
        let name = extract_name(node, source);
        out.push(Entry {
            node: *node,
            name: name.clone(),
            name_path: name.clone(),
            chunk_type: ChunkType::Class,
        });
        if let Some(body) = node.child_by_field_name(syntax.body_field) {
            let mut cursor = body.walk();
            for child in body.named_children(&mut cursor) {
                collect(&child, source, syntax, Some(&name), out);
            }
        }
        return;
    }

    if syntax.interface_kinds.contains(&kind) {
        let name = extract_name(node, source);
        out.push(Entry {
            node: *node,
            name: name.clone(),
            name_path: name,
            chunk_type: ChunkType::Interface,
        });
        return;
    }

    if syntax.function_kinds.contains(&kind) {
        let name = extract_name(node, source);
        let (chunk_type, name_path) = match class_context {
            Some(class_name) => (ChunkType::Method, format!("{class_name}.{name}")),
            None => (ChunkType::Function, name.clone()),
        };
        out.push(Entry {
            node: *node,
            name,
            name_path,
            chunk_type,
        });
        return;
    }

    // Transparent wrapper (export/decorator/module body/...): descend
    // without introducing a class context unless already inside one.
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect(&child, source, syntax, class_context, out);
    }
}

fn extract_name(node: &Node, source: &str) -> String {
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .or_else(|| node.child_by_field_name("trait"))
        .map(|n| node_text(&n, source).to_string())
        .unwrap_or_else(|| format!("<anonymous:{}>", node.kind()))
}

fn build_ast_chunk(
    repository: &str,
    file_path: &str,
    language: Language,
    source: &str,
    syntax: &LanguageSyntax,
    entry: Entry,
    commit_hash: &Option<String>,
) -> Chunk {
    let start_line = entry.node.start_position().row as u32 + 1;
    let end_line = entry.node.end_position().row as u32 + 1;
    let metadata = metadata::extract(&entry.node, source, syntax);
    Chunk {
        id: Uuid::new_v4(),
        repository: repository.to_string(),
        file_path: file_path.to_string(),
        language,
        chunk_type: entry.chunk_type,
        name: Some(entry.name),
        name_path: entry.name_path,
        source_code: node_text(&entry.node, source).to_string(),
        start_line,
        end_line,
        metadata,
        embedding_text: None,
        embedding_code: None,
        commit_hash: commit_hash.clone(),
        indexed_at: Utc::now(),
    }
}

/// Fixed-line windowing with overlap (spec §4.2 step 3), used when AST
/// parsing fails or times out. Windows may overlap; each gets a distinct
/// `start_line` so the storage-level uniqueness key still holds.
fn fallback_windows(
    repository: &str,
    file_path: &str,
    language: Language,
    source: &str,
    commit_hash: &Option<String>,
) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let step = FALLBACK_WINDOW_LINES - FALLBACK_OVERLAP_LINES;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + FALLBACK_WINDOW_LINES).min(lines.len());
        let window = lines[start..end].join("\n");
        let start_line = start as u32 + 1;
        let end_line = end as u32;
        chunks.push(Chunk {
            id: Uuid::new_v4(),
            repository: repository.to_string(),
            file_path: file_path.to_string(),
            language,
            chunk_type: ChunkType::FallbackBlock,
            name: None,
            name_path: format!("fallback:{start_line}-{end_line}"),
            source_code: window,
            start_line,
            end_line,
            metadata: json!({"fallback": true, "reason": "ast_parsing_failed"}),
            embedding_text: None,
            embedding_code: None,
            commit_hash: commit_hash.clone(),
            indexed_at: Utc::now(),
        });
        if end >= lines.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_zero_chunks() {
        let result = chunk_file("demo", "a.py", Language::Python, "   \n  \n", None);
        assert!(result.chunks.is_empty());
        assert!(!result.used_fallback);
    }

    #[test]
    fn typescript_function_is_one_chunk() {
        let src = "export function validateUser(email: string): boolean {\n  if (!email) return false;\n  return email.includes('@');\n}\n";
        let result = chunk_file("demo", "user.ts", Language::TypeScript, src, None);
        assert_eq!(result.chunks.len(), 1);
        let chunk = &result.chunks[0];
        assert_eq!(chunk.name.as_deref(), Some("validateUser"));
        assert_eq!(chunk.chunk_type, ChunkType::Function);
        assert_eq!(chunk.metadata["signature"]["is_async"], false);
        assert!(chunk.metadata["complexity"]["cyclomatic"].as_u64().unwrap() >= 2);
    }

    #[test]
    fn class_methods_get_dotted_name_path() {
        let src = "class Greeter:\n    def greet(self):\n        return 'hi'\n";
        let result = chunk_file("demo", "g.py", Language::Python, src, None);
        assert_eq!(result.chunks.len(), 2);
        let class = result.chunks.iter().find(|c| c.chunk_type == ChunkType::Class).unwrap();
        assert_eq!(class.name_path, "Greeter");
        let method = result.chunks.iter().find(|c| c.chunk_type == ChunkType::Method).unwrap();
        assert_eq!(method.name_path, "Greeter.greet");
    }

    #[test]
    fn fallback_windows_overlap_and_cover_source() {
        let many_lines: String = (0..130).map(|i| format!("line {i}\n")).collect();
        let chunks = fallback_windows("demo", "big.py", Language::Python, &many_lines, &None);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].metadata["fallback"].as_bool().unwrap());
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 60);
        assert_eq!(chunks[1].start_line, 46);
    }
}
