//! Metadata Extractor (C3, spec §4.3). Walks a chunk's sub-AST — reusing
//! the tree the Chunker already parsed, no second parse pass — producing
//! `{signature, calls, imports, complexity}` plus any `extractor_warnings`.

use crate::features::parsing::{node_text, LanguageSyntax};
use serde_json::{json, Value as Json};
use tree_sitter::Node;

/// Extracts metadata for one chunk's AST node. `warnings` accumulates a
/// message per section that could not be extracted (spec §4.3: a failure
/// in one section produces empty values for that section, not a failed
/// chunk).
pub fn extract(node: &Node, source: &str, syntax: &LanguageSyntax) -> Json {
    let mut warnings = Vec::new();

    let signature = extract_signature(node, source, syntax).unwrap_or_else(|| {
        warnings.push("signature extraction failed".to_string());
        json!({"parameters": [], "is_async": false, "is_generic": false})
    });
    let calls = extract_calls(node, source, syntax);
    let imports = extract_imports(node, source, syntax);
    let complexity = extract_complexity(node, syntax);

    json!({
        "signature": signature,
        "calls": calls,
        "imports": imports,
        "complexity": complexity,
        "extractor_warnings": warnings,
    })
}

fn extract_signature(node: &Node, source: &str, syntax: &LanguageSyntax) -> Option<Json> {
    let params_node = node.child_by_field_name(syntax.params_field);
    let parameters: Vec<Json> = params_node
        .map(|p| {
            let mut cursor = p.walk();
            p.named_children(&mut cursor)
                .filter(|c| c.kind() != "," && !c.kind().is_empty())
                .map(|c| {
                    let name = c
                        .child_by_field_name("name")
                        .or_else(|| c.child_by_field_name("pattern"))
                        .map(|n| node_text(&n, source).to_string())
                        .unwrap_or_else(|| node_text(&c, source).to_string());
                    let type_ann = c
                        .child_by_field_name("type")
                        .map(|n| node_text(&n, source).to_string());
                    match type_ann {
                        Some(t) => json!({"name": name, "type": t}),
                        None => json!({"name": name}),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let return_type = node
        .child_by_field_name("return_type")
        .or_else(|| node.child_by_field_name("type"))
        .map(|n| node_text(&n, source).to_string());

    let is_async = syntax
        .async_keyword
        .map(|kw| {
            let mut cursor = node.walk();
            node.children(&mut cursor).any(|c| c.kind() == kw)
        })
        .unwrap_or(false);

    let is_generic = node.child_by_field_name("type_parameters").is_some();

    Some(json!({
        "parameters": parameters,
        "return_type": return_type,
        "is_async": is_async,
        "is_generic": is_generic,
    }))
}

fn extract_calls(node: &Node, source: &str, syntax: &LanguageSyntax) -> Vec<Json> {
    let mut calls = Vec::new();
    walk(node, &mut |n| {
        if syntax.call_kinds.contains(&n.kind()) {
            let callee = syntax
                .call_callee_fields
                .iter()
                .find_map(|f| n.child_by_field_name(f))
                .map(|c| node_text(&c, source).to_string())
                .unwrap_or_default();
            if !callee.is_empty() {
                let is_method_call = callee.contains('.');
                calls.push(json!({
                    "callee_name": callee,
                    "line": n.start_position().row as u32 + 1,
                    "is_method_call": is_method_call,
                }));
            }
        }
    });
    calls
}

fn extract_imports(node: &Node, source: &str, syntax: &LanguageSyntax) -> Vec<Json> {
    let mut imports = Vec::new();
    walk(node, &mut |n| {
        if syntax.import_kinds.contains(&n.kind()) {
            let text = node_text(&n, source);
            let module = n
                .child_by_field_name("module_name")
                .or_else(|| n.child_by_field_name("name"))
                .or_else(|| n.child_by_field_name("source"))
                .or_else(|| n.child_by_field_name("path"))
                .map(|c| node_text(&c, source).trim_matches(['"', '\'']).to_string())
                .unwrap_or_else(|| text.to_string());
            let is_relative = module.starts_with('.');
            imports.push(json!({
                "imported_name": module,
                "module": module,
                "is_relative": is_relative,
            }));
        }
    });
    imports
}

/// Cyclomatic complexity: one decision point per node of a kind in
/// `syntax.decision_kinds`, starting from 1 (spec §4.3).
fn extract_complexity(node: &Node, syntax: &LanguageSyntax) -> Json {
    let mut cyclomatic: u32 = 1;
    walk(node, &mut |n| {
        if syntax.decision_kinds.contains(&n.kind()) {
            cyclomatic += 1;
        }
    });
    let lines_of_code = (node.end_position().row - node.start_position().row) as u32 + 1;
    json!({
        "cyclomatic": cyclomatic,
        "lines_of_code": lines_of_code,
    })
}

fn walk<'a>(node: &Node<'a>, visit: &mut impl FnMut(&Node<'a>)) {
    let mut cursor = node.walk();
    visit_recursive(node, &mut cursor, visit);
}

fn visit_recursive<'a>(node: &Node<'a>, cursor: &mut tree_sitter::TreeCursor<'a>, visit: &mut impl FnMut(&Node<'a>)) {
    visit(node);
    for child in node.children(cursor) {
        visit_recursive(&child, cursor, visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::parsing::{parse, syntax_for};
    use mnemolite_storage::domain::Language;
    use std::time::Duration;

    #[test]
    fn python_function_complexity_counts_if_statement() {
        let src = "def f(x):\n    if x:\n        return 1\n    return 0\n";
        let parsed = parse(Language::Python, src, Duration::from_secs(10)).unwrap();
        let syntax = syntax_for(Language::Python);
        let root = parsed.tree.root_node();
        let func = root.named_child(0).unwrap();
        let meta = extract(&func, src, syntax);
        assert_eq!(meta["complexity"]["cyclomatic"], json_num(2));
    }

    #[test]
    fn typescript_signature_has_parameter_types() {
        let src = "function f(x: number, y: string): boolean {\n  return true;\n}\n";
        let parsed = parse(Language::TypeScript, src, Duration::from_secs(10)).unwrap();
        let syntax = syntax_for(Language::TypeScript);
        let root = parsed.tree.root_node();
        let func = root.named_child(0).unwrap();
        let meta = extract(&func, src, syntax);
        let params = meta["signature"]["parameters"].as_array().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0]["type"], "number");
    }

    #[test]
    fn calls_are_detected() {
        let src = "def f():\n    g()\n    obj.h()\n";
        let parsed = parse(Language::Python, src, Duration::from_secs(10)).unwrap();
        let syntax = syntax_for(Language::Python);
        let root = parsed.tree.root_node();
        let func = root.named_child(0).unwrap();
        let meta = extract(&func, src, syntax);
        let calls = meta["calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
    }

    fn json_num(n: u32) -> Json {
        Json::from(n)
    }
}
