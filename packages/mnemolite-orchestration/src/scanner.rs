//! File scanner (spec §4.6 "File selection"): recursive walk, canonical
//! extensions per language, configurable exclude set.

use mnemolite_storage::domain::Language;
use std::path::{Path, PathBuf};

/// Default exclude set (spec §4.6): `node_modules`, `__tests__`,
/// `*.d.ts`, `*.test.*`, `*.spec.*`.
pub fn default_excludes() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        "__tests__".to_string(),
        "*.d.ts".to_string(),
        "*.test.*".to_string(),
        "*.spec.*".to_string(),
    ]
}

pub struct ScannedFile {
    pub path: PathBuf,
    pub language: Language,
}

fn matches_exclude(path: &Path, excludes: &[String]) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    excludes.iter().any(|pattern| {
        if pattern.contains('*') {
            glob_match(pattern, file_name)
        } else {
            path.components().any(|c| c.as_os_str() == pattern.as_str())
        }
    })
}

/// `*`-only glob match (no directory separators, no `?`): splits the
/// pattern on its wildcards and checks each literal segment occurs in
/// order, anchoring the first/last segment when the pattern doesn't
/// start/end with `*`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    let mut cursor = 0usize;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 && !pattern.starts_with('*') {
            if !text[cursor..].starts_with(segment) {
                return false;
            }
            cursor += segment.len();
        } else if i == segments.len() - 1 && !pattern.ends_with('*') {
            if !text[cursor..].ends_with(segment) {
                return false;
            }
        } else {
            match text[cursor..].find(segment) {
                Some(pos) => cursor += pos + segment.len(),
                None => return false,
            }
        }
    }
    true
}

/// Walks `root` recursively, keeping files whose extension maps to a
/// known `Language` and that don't match `excludes`.
pub fn scan(root: &Path, excludes: &[String]) -> Vec<ScannedFile> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !matches_exclude(e.path(), excludes))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if matches_exclude(path, excludes) {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
        if let Some(language) = Language::from_extension(ext) {
            out.push(ScannedFile { path: path.to_path_buf(), language });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_python_files_and_skips_node_modules() {
        let dir = tempfile_dir();
        fs::create_dir_all(dir.join("node_modules")).unwrap();
        fs::write(dir.join("node_modules/skip.py"), "x = 1\n").unwrap();
        fs::write(dir.join("keep.py"), "x = 1\n").unwrap();
        fs::write(dir.join("notes.txt"), "n/a").unwrap();
        let files = scan(&dir, &default_excludes());
        let names: Vec<_> = files.iter().map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string()).collect();
        assert!(names.contains(&"keep.py".to_string()));
        assert!(!names.contains(&"skip.py".to_string()));
        assert!(!names.iter().any(|n| n == "notes.txt"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn skips_test_and_declaration_files() {
        let dir = tempfile_dir();
        fs::write(dir.join("component.test.ts"), "export {}\n").unwrap();
        fs::write(dir.join("types.d.ts"), "export {}\n").unwrap();
        fs::write(dir.join("component.ts"), "export function f() {}\n").unwrap();
        let files = scan(&dir, &default_excludes());
        let names: Vec<_> = files.iter().map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["component.ts".to_string()]);
        let _ = fs::remove_dir_all(&dir);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mnemolite-scan-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
