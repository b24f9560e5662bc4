//! Tree-sitter parsing (spec §4.2 step 1, §4.3). Follows a port/adapter
//! split: tree-sitter lives only in this module, and a per-language
//! `LanguageSyntax` table (rather than one plugin struct per language)
//! drives the chunker and metadata extractor's AST walks.

use mnemolite_storage::domain::Language;
use std::time::Duration;
use tree_sitter::{Parser, Tree};

/// Data-driven description of how a language's grammar expresses the
/// constructs the Chunker (C2) and Metadata Extractor (C3) care about.
/// One table per language rather than a struct impl per language, since
/// this engine only needs kind classification, not full control-flow
/// analysis.
pub struct LanguageSyntax {
    pub function_kinds: &'static [&'static str],
    pub class_kinds: &'static [&'static str],
    pub interface_kinds: &'static [&'static str],
    pub call_kinds: &'static [&'static str],
    pub call_callee_fields: &'static [&'static str],
    pub import_kinds: &'static [&'static str],
    pub decision_kinds: &'static [&'static str],
    pub name_field: &'static str,
    pub async_keyword: Option<&'static str>,
    pub body_field: &'static str,
    pub params_field: &'static str,
}

pub fn syntax_for(language: Language) -> &'static LanguageSyntax {
    match language {
        Language::Python => &PYTHON,
        Language::TypeScript | Language::JavaScript => &TS_JS,
        Language::Rust => &RUST,
        Language::Go => &GO,
        Language::Java => &JAVA,
    }
}

static PYTHON: LanguageSyntax = LanguageSyntax {
    function_kinds: &["function_definition"],
    class_kinds: &["class_definition"],
    interface_kinds: &[],
    call_kinds: &["call"],
    call_callee_fields: &["function"],
    import_kinds: &["import_statement", "import_from_statement"],
    decision_kinds: &[
        "if_statement",
        "for_statement",
        "while_statement",
        "except_clause",
        "boolean_operator",
        "conditional_expression",
    ],
    name_field: "name",
    async_keyword: Some("async"),
    body_field: "body",
    params_field: "parameters",
};

static TS_JS: LanguageSyntax = LanguageSyntax {
    function_kinds: &[
        "function_declaration",
        "method_definition",
        "function_signature",
        "arrow_function",
    ],
    class_kinds: &["class_declaration"],
    interface_kinds: &["interface_declaration"],
    call_kinds: &["call_expression"],
    call_callee_fields: &["function"],
    import_kinds: &["import_statement"],
    decision_kinds: &[
        "if_statement",
        "for_statement",
        "for_in_statement",
        "while_statement",
        "do_statement",
        "switch_case",
        "catch_clause",
        "ternary_expression",
        "binary_expression",
    ],
    name_field: "name",
    async_keyword: Some("async"),
    body_field: "body",
    params_field: "parameters",
};

static RUST: LanguageSyntax = LanguageSyntax {
    function_kinds: &["function_item"],
    class_kinds: &["struct_item", "impl_item"],
    interface_kinds: &["trait_item"],
    call_kinds: &["call_expression"],
    call_callee_fields: &["function"],
    import_kinds: &["use_declaration"],
    decision_kinds: &[
        "if_expression",
        "for_expression",
        "while_expression",
        "match_expression",
        "match_arm",
        "binary_expression",
    ],
    name_field: "name",
    async_keyword: Some("async"),
    body_field: "body",
    params_field: "parameters",
};

static GO: LanguageSyntax = LanguageSyntax {
    function_kinds: &["function_declaration", "method_declaration"],
    class_kinds: &["type_declaration"],
    interface_kinds: &[],
    call_kinds: &["call_expression"],
    call_callee_fields: &["function"],
    import_kinds: &["import_declaration"],
    decision_kinds: &[
        "if_statement",
        "for_statement",
        "expression_switch_statement",
        "type_switch_statement",
        "binary_expression",
    ],
    name_field: "name",
    async_keyword: None,
    body_field: "body",
    params_field: "parameters",
};

static JAVA: LanguageSyntax = LanguageSyntax {
    function_kinds: &["method_declaration", "constructor_declaration"],
    class_kinds: &["class_declaration"],
    interface_kinds: &["interface_declaration"],
    call_kinds: &["method_invocation"],
    call_callee_fields: &["name"],
    import_kinds: &["import_declaration"],
    decision_kinds: &[
        "if_statement",
        "for_statement",
        "while_statement",
        "do_statement",
        "switch_expression",
        "catch_clause",
        "ternary_expression",
        "binary_expression",
    ],
    name_field: "name",
    async_keyword: None,
    body_field: "body",
    params_field: "parameters",
};

fn ts_language(language: Language) -> tree_sitter::Language {
    match language {
        Language::Python => tree_sitter_python::language(),
        // tree-sitter-typescript ships two grammars; plain TS covers both
        // the chunker's needs for .ts/.tsx and .js/.jsx/.mjs alike closely
        // enough for the constructs this engine inspects.
        Language::TypeScript | Language::JavaScript => tree_sitter_typescript::language_typescript(),
        Language::Rust => tree_sitter_rust::language(),
        Language::Go => tree_sitter_go::language(),
        Language::Java => tree_sitter_java::language(),
    }
}

/// A parsed file: the tree-sitter tree plus the source it was parsed from
/// (nodes only carry byte ranges, so callers need both to read text).
pub struct ParsedFile {
    pub tree: Tree,
    pub source: String,
    pub language: Language,
}

/// Parses `source` under `deadline`. Returns `None` (not an error) on
/// timeout or grammar failure to parse anything at all — the Chunker
/// (spec §4.2 step 3) treats that as "fall back to fixed-line windowing".
pub fn parse(language: Language, source: &str, deadline: Duration) -> Option<ParsedFile> {
    let mut parser = Parser::new();
    parser.set_language(ts_language(language)).ok()?;
    parser.set_timeout_micros(deadline.as_micros() as u64);
    let tree = parser.parse(source, None)?;
    Some(ParsedFile {
        tree,
        source: source.to_string(),
        language,
    })
}

/// Reads a tree-sitter node's source text.
pub fn node_text<'a>(node: &tree_sitter::Node, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_python_function() {
        let parsed = parse(Language::Python, "def f():\n    pass\n", Duration::from_secs(10))
            .expect("python grammar should parse valid source");
        assert!(!parsed.tree.root_node().has_error());
    }

    #[test]
    fn parses_simple_typescript_function() {
        let src = "export function f(x: number): number {\n  return x;\n}\n";
        let parsed = parse(Language::TypeScript, src, Duration::from_secs(10))
            .expect("typescript grammar should parse valid source");
        assert!(!parsed.tree.root_node().has_error());
    }

    #[test]
    fn syntax_tables_cover_every_language() {
        for lang in [
            Language::Python,
            Language::TypeScript,
            Language::JavaScript,
            Language::Rust,
            Language::Go,
            Language::Java,
        ] {
            assert!(!syntax_for(lang).function_kinds.is_empty());
        }
    }
}
