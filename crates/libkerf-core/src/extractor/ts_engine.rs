use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, Tree};
use tree_sitter_language::LanguageFn;

use super::imports::{extract_imports, import_symbols};
use super::{Extraction, StructureExtractor};
use crate::error::KerfError;
use crate::types::file::{ContentType, SymbolInfo};

/// Syntax-tree extractor for languages with a bundled grammar
pub struct SyntaxTreeExtractor;

impl StructureExtractor for SyntaxTreeExtractor {
    fn name(&self) -> &'static str {
        "tree-sitter"
    }

    fn supports(&self, content_type: ContentType, language: &str) -> bool {
        matches!(content_type, ContentType::StructuredSource | ContentType::TestSource)
            && language_config(language).is_some()
    }

    fn extract(&self, content: &str, language: &str) -> Result<Extraction, KerfError> {
        let tree = parse(content, language)
            .ok_or_else(|| KerfError::Index(format!("no {} parser available", language)))?;
        if tree.root_node().has_error() {
            return Err(KerfError::Index(format!("syntax errors in {} source", language)));
        }

        let mut symbols = extract_symbols(&tree, content, language)
            .ok_or_else(|| KerfError::Internal(format!("invalid {} symbol query", language)))?;
        let imports = extract_imports(content, language);
        symbols.extend(import_symbols(&imports));
        symbols.sort_by(|a, b| a.line_start.cmp(&b.line_start).then_with(|| a.name.cmp(&b.name)));

        Ok(Extraction {
            symbols,
            imports: imports.into_iter().map(|i| i.spec).collect(),
            parse_failed: false,
        })
    }
}

/// Whether a grammar is bundled for `language`
pub fn has_grammar(language: &str) -> bool {
    language_config(language).is_some()
}

/// Parse `content`; `None` if there is no grammar or the parser gives up
pub fn parse(content: &str, language: &str) -> Option<Tree> {
    let (lang_fn, _, _) = language_config(language)?;
    let lang: Language = Language::from(lang_fn);
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;
    parser.parse(content, None)
}

fn extract_symbols(tree: &Tree, content: &str, language: &str) -> Option<Vec<SymbolInfo>> {
    let (lang_fn, query_source, kinds) = language_config(language)?;
    let lang: Language = Language::from(lang_fn);
    let query = Query::new(&lang, query_source).ok()?;

    let name_idx = query.capture_index_for_name("name")?;
    let def_idx = query.capture_index_for_name("definition");

    let mut cursor = QueryCursor::new();
    let mut symbols = Vec::new();

    let mut matches = cursor.matches(&query, tree.root_node(), content.as_bytes());
    while let Some(m) = matches.next() {
        let mut name: Option<&str> = None;
        let mut def_span: Option<(u32, u32)> = None;
        let mut name_span = (0u32, 0u32);

        for capture in m.captures {
            if capture.index == name_idx {
                let start = capture.node.start_byte();
                let end = capture.node.end_byte();
                if start <= end && end <= content.len() {
                    name = Some(&content[start..end]);
                }
                name_span = (
                    capture.node.start_position().row as u32 + 1,
                    capture.node.end_position().row as u32 + 1,
                );
            }
            if Some(capture.index) == def_idx {
                def_span = Some((
                    capture.node.start_position().row as u32 + 1,
                    capture.node.end_position().row as u32 + 1,
                ));
            }
        }

        let (line_start, line_end) = def_span.unwrap_or(name_span);
        if let Some(symbol_name) = name {
            let kind = kinds.get(m.pattern_index).copied().unwrap_or("unknown");
            symbols.push(SymbolInfo::new(symbol_name, kind, line_start, line_end));
        }
    }

    // Same name+line keeps the more specific kind
    symbols.sort_by(|a, b| {
        a.line_start
            .cmp(&b.line_start)
            .then_with(|| kind_priority(&a.kind).cmp(&kind_priority(&b.kind)))
    });
    symbols.dedup_by(|a, b| a.line_start == b.line_start && a.name == b.name);
    Some(symbols)
}

/// Lower = more specific, preferred.
fn kind_priority(kind: &str) -> u8 {
    match kind {
        "struct" | "class" | "interface" | "enum" | "trait" | "module" => 0,
        "function" | "method" | "impl" | "const" | "static" => 1,
        "type" => 2,
        _ => 3,
    }
}

/// Depth-first walk; `visit` returns whether to descend into the node
fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>) -> bool) {
    let mut cursor = root.walk();
    let mut descend = true;
    loop {
        if descend && visit(cursor.node()) && cursor.goto_first_child() {
            continue;
        }
        if cursor.goto_next_sibling() {
            descend = true;
            continue;
        }
        if !cursor.goto_parent() {
            break;
        }
        descend = false;
    }
}

fn splice(content: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by_key(|(start, _, _)| *start);
    let mut out = String::with_capacity(content.len());
    let mut pos = 0;
    for (start, end, replacement) in edits {
        if start < pos || end > content.len() {
            continue;
        }
        out.push_str(&content[pos..start]);
        out.push_str(&replacement);
        pos = end;
    }
    out.push_str(&content[pos..]);
    out
}

fn is_doc_comment(text: &str) -> bool {
    text.starts_with("///") || text.starts_with("//!") || text.starts_with("/**")
}

/// Remove non-doc comments. `None` without a grammar or on a broken parse.
pub fn strip_comments(content: &str, language: &str) -> Option<String> {
    let tree = parse(content, language)?;
    if tree.root_node().has_error() {
        return None;
    }
    let mut edits = Vec::new();
    walk(tree.root_node(), |node| {
        if node.kind().contains("comment") {
            let text = &content[node.start_byte()..node.end_byte()];
            if !is_doc_comment(text) {
                edits.push((node.start_byte(), node.end_byte(), String::new()));
            }
            return false;
        }
        true
    });
    Some(splice(content, edits))
}

/// Field name of the body for function-like nodes
fn function_body<'t>(node: Node<'t>, language: &str) -> Option<Node<'t>> {
    let is_function = match language {
        "python" => node.kind() == "function_definition",
        "rust" => node.kind() == "function_item",
        "go" => matches!(node.kind(), "function_declaration" | "method_declaration" | "func_literal"),
        _ => matches!(
            node.kind(),
            "function_declaration"
                | "function_expression"
                | "generator_function_declaration"
                | "method_definition"
                | "arrow_function"
        ),
    };
    if !is_function {
        return None;
    }
    let body = node.child_by_field_name("body")?;
    match body.kind() {
        "block" | "statement_block" => Some(body),
        _ => None,
    }
}

/// Leading docstring of a Python block, if any
fn python_docstring<'t>(body: Node<'t>) -> Option<Node<'t>> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let inner = first.named_child(0)?;
    (inner.kind() == "string").then_some(first)
}

/// Replace function bodies with placeholders, keeping signatures and
/// Python docstrings. `None` without a grammar or on a broken parse.
pub fn elide_bodies(content: &str, language: &str) -> Option<String> {
    let tree = parse(content, language)?;
    if tree.root_node().has_error() {
        return None;
    }
    let mut edits = Vec::new();
    walk(tree.root_node(), |node| {
        let Some(body) = function_body(node, language) else {
            return true;
        };
        let replacement = if language == "python" {
            let indent = " ".repeat(body.start_position().column);
            match python_docstring(body) {
                Some(doc) => format!("{}\n{}...", &content[doc.start_byte()..doc.end_byte()], indent),
                None => "...".to_string(),
            }
        } else {
            "{ ... }".to_string()
        };
        edits.push((body.start_byte(), body.end_byte(), replacement));
        // Nested functions disappear with the body
        false
    });
    Some(splice(content, edits))
}

/// Returns (LanguageFn, query_source, pattern_kinds) for a given language string.
fn language_config(language: &str) -> Option<(LanguageFn, &'static str, &'static [&'static str])> {
    match language {
        "rust" => Some((tree_sitter_rust::LANGUAGE, RUST_QUERY, RUST_KINDS)),
        "python" => Some((tree_sitter_python::LANGUAGE, PYTHON_QUERY, PYTHON_KINDS)),
        "typescript" => Some((tree_sitter_typescript::LANGUAGE_TYPESCRIPT, TYPESCRIPT_QUERY, TYPESCRIPT_KINDS)),
        "typescriptreact" => Some((tree_sitter_typescript::LANGUAGE_TSX, TYPESCRIPT_QUERY, TYPESCRIPT_KINDS)),
        "javascript" => Some((tree_sitter_javascript::LANGUAGE, JAVASCRIPT_QUERY, JAVASCRIPT_KINDS)),
        "go" => Some((tree_sitter_go::LANGUAGE, GO_QUERY, GO_KINDS)),
        _ => None,
    }
}

// --- Python ---

const PYTHON_QUERY: &str = r#"
(function_definition name: (identifier) @name) @definition
(class_definition name: (identifier) @name) @definition
(module (expression_statement (assignment left: (identifier) @name)) @definition)
"#;

const PYTHON_KINDS: &[&str] = &[
    "function", // function_definition
    "class",    // class_definition
    "const",    // module-level assignment
];

// --- Rust ---

const RUST_QUERY: &str = r#"
(function_item name: (identifier) @name) @definition
(struct_item name: (type_identifier) @name) @definition
(enum_item name: (type_identifier) @name) @definition
(trait_item name: (type_identifier) @name) @definition
(impl_item type: (type_identifier) @name) @definition
(const_item name: (identifier) @name) @definition
(type_item name: (type_identifier) @name) @definition
(static_item name: (identifier) @name) @definition
(mod_item name: (identifier) @name) @definition
"#;

const RUST_KINDS: &[&str] = &[
    "function", // function_item
    "struct",   // struct_item
    "enum",     // enum_item
    "trait",    // trait_item
    "impl",     // impl_item
    "const",    // const_item
    "type",     // type_item
    "static",   // static_item
    "module",   // mod_item
];

// --- TypeScript (works for both TS and TSX grammars) ---

const TYPESCRIPT_QUERY: &str = r#"
(function_declaration name: (identifier) @name) @definition
(class_declaration name: (type_identifier) @name) @definition
(interface_declaration name: (type_identifier) @name) @definition
(type_alias_declaration name: (type_identifier) @name) @definition
(enum_declaration name: (identifier) @name) @definition
(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function)) @definition)
(method_definition name: (property_identifier) @name) @definition
"#;

const TYPESCRIPT_KINDS: &[&str] = &[
    "function",  // function_declaration
    "class",     // class_declaration
    "interface", // interface_declaration
    "type",      // type_alias_declaration
    "enum",      // enum_declaration
    "function",  // arrow function in variable
    "method",    // method_definition
];

// --- JavaScript ---

const JAVASCRIPT_QUERY: &str = r#"
(function_declaration name: (identifier) @name) @definition
(class_declaration name: (identifier) @name) @definition
(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function)) @definition)
(method_definition name: (property_identifier) @name) @definition
"#;

const JAVASCRIPT_KINDS: &[&str] = &[
    "function", // function_declaration
    "class",    // class_declaration
    "function", // arrow function in variable
    "method",   // method_definition
];

// --- Go ---

const GO_QUERY: &str = r#"
(function_declaration name: (identifier) @name) @definition
(method_declaration name: (field_identifier) @name) @definition
(type_declaration (type_spec name: (type_identifier) @name type: (struct_type))) @definition
(type_declaration (type_spec name: (type_identifier) @name type: (interface_type))) @definition
(type_declaration (type_spec name: (type_identifier) @name)) @definition
"#;

const GO_KINDS: &[&str] = &[
    "function",  // function_declaration
    "function",  // method_declaration
    "struct",    // struct type
    "interface", // interface type
    "type",      // other type alias
];

#[cfg(test)]
mod tests {
    use super::*;

    fn names(extraction: &Extraction) -> Vec<&str> {
        extraction.symbols.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_python_extraction() {
        let content = r#"import os
from db import connect

MAX_RETRIES = 3

class Session:
    def __init__(self):
        self.user = None

    def login(self, name):
        return connect(name)

def standalone():
    pass
"#;

        let out = SyntaxTreeExtractor.extract(content, "python").unwrap();
        let n = names(&out);
        assert!(n.contains(&"Session"), "missing Session, got: {:?}", n);
        assert!(n.contains(&"login"), "missing login, got: {:?}", n);
        assert!(n.contains(&"standalone"), "missing standalone, got: {:?}", n);
        assert!(n.contains(&"MAX_RETRIES"), "missing MAX_RETRIES, got: {:?}", n);
        assert!(n.contains(&"os"));
        assert_eq!(out.imports, vec!["os".to_string(), "db".to_string()]);
        assert!(!out.parse_failed);

        let class = out.symbols.iter().find(|s| s.name == "Session").unwrap();
        assert_eq!(class.kind, "class");
        assert_eq!(class.line_start, 6);
        assert_eq!(class.line_end, 11);
    }

    #[test]
    fn test_malformed_python_is_error() {
        let content = "def broken(:\n    return\n";
        assert!(SyntaxTreeExtractor.extract(content, "python").is_err());
    }

    #[test]
    fn test_rust_extraction() {
        let content = r#"mod config;

pub struct Config {
    pub name: String,
}

impl Config {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

pub const MAX_SIZE: usize = 100;
"#;

        let out = SyntaxTreeExtractor.extract(content, "rust").unwrap();
        let n = names(&out);
        assert!(n.contains(&"Config"), "got: {:?}", n);
        assert!(n.contains(&"new"), "got: {:?}", n);
        assert!(n.contains(&"MAX_SIZE"), "got: {:?}", n);
        assert!(out.imports.contains(&"mod:config".to_string()));

        let config = out.symbols.iter().find(|s| s.name == "Config" && s.kind == "struct").unwrap();
        assert_eq!(config.line_start, 3);
        assert_eq!(config.line_end, 5);
    }

    #[test]
    fn test_typescript_extraction() {
        let content = r#"import { api } from './api';

export function greet(name: string): string {
    return `Hello, ${name}!`;
}

export interface Config {
    name: string;
}

const fetchData = async (url: string) => {
    return fetch(url);
};
"#;

        let out = SyntaxTreeExtractor.extract(content, "typescript").unwrap();
        let n = names(&out);
        assert!(n.contains(&"greet"), "got: {:?}", n);
        assert!(n.contains(&"Config"), "got: {:?}", n);
        assert!(n.contains(&"fetchData"), "got: {:?}", n);
        assert_eq!(out.imports, vec!["./api".to_string()]);
    }

    #[test]
    fn test_go_extraction() {
        let content = r#"package main

import "fmt"

func main() {
    fmt.Println("hello")
}

type Config struct {
    Name string
}

type Handler interface {
    Handle() error
}
"#;

        let out = SyntaxTreeExtractor.extract(content, "go").unwrap();
        let config = out.symbols.iter().find(|s| s.name == "Config").unwrap();
        assert_eq!(config.kind, "struct");
        let handler = out.symbols.iter().find(|s| s.name == "Handler").unwrap();
        assert_eq!(handler.kind, "interface");
        assert!(names(&out).contains(&"main"));
    }

    #[test]
    fn test_strip_comments_keeps_docs() {
        let content = "/// Adds.\nfn add(a: i32) -> i32 {\n    // inline\n    a + 1 // trailing\n}\n";
        let out = strip_comments(content, "rust").unwrap();
        assert!(out.contains("/// Adds."));
        assert!(!out.contains("inline"));
        assert!(!out.contains("trailing"));
        assert!(out.contains("a + 1"));
    }

    #[test]
    fn test_elide_python_bodies_keeps_docstring() {
        let content = r#"def login(user):
    """Authenticate a user."""
    token = make_token(user)
    return token

def logout():
    clear()
"#;
        let out = elide_bodies(content, "python").unwrap();
        assert!(out.contains("def login(user):"));
        assert!(out.contains("\"\"\"Authenticate a user.\"\"\""));
        assert!(!out.contains("make_token"));
        assert!(!out.contains("clear()"));
        assert!(out.contains("def logout():\n    ..."));
    }

    #[test]
    fn test_elide_brace_bodies() {
        let content = "function add(a, b) {\n  const c = a + b;\n  return c;\n}\n";
        let out = elide_bodies(content, "javascript").unwrap();
        assert_eq!(out, "function add(a, b) { ... }\n");
    }

    #[test]
    fn test_no_grammar() {
        assert!(parse("x", "cobol").is_none());
        assert!(!has_grammar("java"));
        assert!(strip_comments("x", "cobol").is_none());
    }
}
