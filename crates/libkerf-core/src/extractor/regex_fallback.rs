use std::sync::LazyLock;

use regex::Regex;

use super::imports::{extract_imports, import_symbols};
use super::{Extraction, StructureExtractor};
use crate::error::KerfError;
use crate::types::file::{ContentType, SymbolInfo};

/// Line-pattern extractor: generic fallback for languages without a grammar,
/// markdown headings and config keys
pub struct RegexExtractor;

impl StructureExtractor for RegexExtractor {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn supports(&self, content_type: ContentType, _language: &str) -> bool {
        !matches!(content_type, ContentType::Other)
    }

    fn extract(&self, content: &str, language: &str) -> Result<Extraction, KerfError> {
        let mut symbols = match language {
            "markdown" | "text" => extract_headings(content),
            "ini" => extract_config_keys(content),
            other => extract(content, other),
        };

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

/// Regex-based symbol extraction by language family
pub fn extract(content: &str, language: &str) -> Vec<SymbolInfo> {
    match language {
        "rust" => extract_rust_symbols(content),
        "python" => extract_python_symbols(content),
        "typescript" | "typescriptreact" | "javascript" => extract_ts_symbols(content),
        "go" => extract_go_symbols(content),
        "java" | "kotlin" | "csharp" | "scala" | "swift" | "php" => extract_c_family_symbols(content),
        "c" | "cpp" => extract_c_symbols(content),
        "ruby" => extract_ruby_symbols(content),
        _ => vec![],
    }
}

static RUST_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\(.*?\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)").unwrap());
static RUST_STRUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\(.*?\))?\s+)?struct\s+(\w+)").unwrap());
static RUST_ENUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\(.*?\))?\s+)?enum\s+(\w+)").unwrap());
static RUST_TRAIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\(.*?\))?\s+)?trait\s+(\w+)").unwrap());
static RUST_IMPL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*impl(?:<[^>]*>)?\s+(\w+)").unwrap());
static RUST_CONST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\(.*?\))?\s+)?(?:const|static)\s+(\w+)").unwrap());

fn extract_rust_symbols(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    add_matches(&mut symbols, content, &RUST_FN, "function");
    add_matches(&mut symbols, content, &RUST_STRUCT, "struct");
    add_matches(&mut symbols, content, &RUST_ENUM, "enum");
    add_matches(&mut symbols, content, &RUST_TRAIT, "trait");
    add_matches(&mut symbols, content, &RUST_IMPL, "impl");
    add_matches(&mut symbols, content, &RUST_CONST, "const");
    symbols.sort_by_key(|s| s.line_start);
    symbols
}

static PY_FN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:async\s+)?def\s+(\w+)").unwrap());
static PY_CLASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^class\s+(\w+)").unwrap());
static PY_CONST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^([A-Z][A-Z0-9_]*)\s*=").unwrap());

fn extract_python_symbols(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    add_matches(&mut symbols, content, &PY_FN, "function");
    add_matches(&mut symbols, content, &PY_CLASS, "class");
    add_matches(&mut symbols, content, &PY_CONST, "const");
    symbols.sort_by_key(|s| s.line_start);
    symbols
}

static TS_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)").unwrap());
static TS_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?class\s+(\w+)").unwrap());
static TS_INTERFACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:export\s+)?interface\s+(\w+)").unwrap());
static TS_TYPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:export\s+)?type\s+(\w+)").unwrap());
static TS_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:const|let)\s+(\w+)\s*=\s*(?:async\s+)?\(").unwrap()
});
static TS_CONST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:export\s+)?const\s+(\w+)").unwrap());

fn extract_ts_symbols(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    add_matches(&mut symbols, content, &TS_FN, "function");
    add_matches(&mut symbols, content, &TS_CLASS, "class");
    add_matches(&mut symbols, content, &TS_INTERFACE, "interface");
    add_matches(&mut symbols, content, &TS_TYPE, "type");
    add_matches(&mut symbols, content, &TS_ARROW, "function");
    add_matches(&mut symbols, content, &TS_CONST, "const");

    // Arrow functions also match the const pattern; the first (function) wins
    symbols.sort_by_key(|s| (s.line_start, s.name.clone()));
    symbols.dedup_by(|a, b| a.line_start == b.line_start && a.name == b.name);
    symbols
}

static GO_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^func\s+(?:\(\w+\s+\*?\w+\)\s+)?(\w+)").unwrap());
static GO_STRUCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^type\s+(\w+)\s+struct").unwrap());
static GO_INTERFACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^type\s+(\w+)\s+interface").unwrap());
static GO_TYPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^type\s+(\w+)\s+\w").unwrap());

fn extract_go_symbols(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    add_matches(&mut symbols, content, &GO_FN, "function");
    add_matches(&mut symbols, content, &GO_STRUCT, "struct");
    add_matches(&mut symbols, content, &GO_INTERFACE, "interface");
    add_matches(&mut symbols, content, &GO_TYPE, "type");

    // struct/interface matches take priority over generic "type"
    symbols.sort_by_key(|s| (s.line_start, s.name.clone()));
    symbols.dedup_by(|a, b| a.line_start == b.line_start && a.name == b.name);
    symbols
}

static CF_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?:public|private|protected|internal|abstract|final|static|sealed|open|data)\s+)*(?:class|object|struct|record)\s+(\w+)").unwrap()
});
static CF_INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?:public|private|protected|internal|sealed)\s+)*(?:interface|trait|protocol)\s+(\w+)").unwrap()
});
static CF_ENUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:(?:public|private|protected|internal)\s+)*enum\s+(?:class\s+)?(\w+)").unwrap());
static CF_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?:public|private|protected|internal|static|final|abstract|override|async|synchronized)\s+)+[\w<>\[\],.? ]*?\s*(\w+)\s*\([^;]*$").unwrap()
});
static CF_FUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:\w+\s+)*(?:fun|func|def|function)\s+(\w+)").unwrap());

/// Java, Kotlin, C#, Scala, Swift, PHP
fn extract_c_family_symbols(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    add_matches(&mut symbols, content, &CF_CLASS, "class");
    add_matches(&mut symbols, content, &CF_INTERFACE, "interface");
    add_matches(&mut symbols, content, &CF_ENUM, "enum");
    add_matches(&mut symbols, content, &CF_METHOD, "method");
    add_matches(&mut symbols, content, &CF_FUN, "function");
    symbols.sort_by(|a, b| a.line_start.cmp(&b.line_start).then_with(|| a.kind.cmp(&b.kind)));
    symbols.dedup_by(|a, b| a.line_start == b.line_start);
    symbols
}

static C_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:static\s+|inline\s+|extern\s+)*[\w:<>*&\s]+?\b(\w+)\s*\([^;]*\)\s*(?:const\s*)?\{").unwrap()
});
static C_STRUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:typedef\s+)?(?:struct|class|union)\s+(\w+)").unwrap());
static C_ENUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:typedef\s+)?enum\s+(\w+)").unwrap());

fn extract_c_symbols(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    add_matches(&mut symbols, content, &C_FN, "function");
    add_matches(&mut symbols, content, &C_STRUCT, "struct");
    add_matches(&mut symbols, content, &C_ENUM, "enum");
    symbols.sort_by_key(|s| s.line_start);
    symbols
}

static RB_DEF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*def\s+(?:self\.)?(\w+[?!]?)").unwrap());
static RB_CLASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*class\s+(\w+)").unwrap());
static RB_MODULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*module\s+(\w+)").unwrap());

fn extract_ruby_symbols(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    add_matches(&mut symbols, content, &RB_DEF, "function");
    add_matches(&mut symbols, content, &RB_CLASS, "class");
    add_matches(&mut symbols, content, &RB_MODULE, "module");
    symbols.sort_by_key(|s| s.line_start);
    symbols
}

static MD_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*$").unwrap());

/// Markdown headings as `heading` symbols
pub fn extract_headings(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    let mut in_fence = false;
    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(cap) = MD_HEADING.captures(line) {
            if let Some(m) = cap.get(1) {
                let n = idx as u32 + 1;
                symbols.push(SymbolInfo::new(m.as_str().trim(), "heading", n, n));
            }
        }
    }
    symbols
}

static CONFIG_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*(?:export[ \t]+)?([A-Za-z_][\w.-]*)[ \t]*[=:]").unwrap());
static CONFIG_SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ \t]*\[+([^\]]+)\]+[ \t]*$").unwrap());

/// `key = value` / `key: value` lines and `[section]` headers as `key` symbols
pub fn extract_config_keys(content: &str) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.starts_with(';') || trimmed.starts_with("//") {
            continue;
        }
        let n = idx as u32 + 1;
        if let Some(m) = CONFIG_SECTION.captures(line).and_then(|c| c.get(1)) {
            symbols.push(SymbolInfo::new(m.as_str().trim(), "section", n, n));
        } else if let Some(m) = CONFIG_KEY.captures(line).and_then(|c| c.get(1)) {
            symbols.push(SymbolInfo::new(m.as_str(), "key", n, n));
        }
    }
    symbols
}

fn add_matches(symbols: &mut Vec<SymbolInfo>, content: &str, re: &Regex, kind: &str) {
    for cap in re.captures_iter(content) {
        if let Some(name_match) = cap.get(1) {
            let line_start = content[..name_match.start()].matches('\n').count() as u32 + 1;
            // Estimate end line (next blank line or +10 lines, whichever is smaller)
            let remaining = &content[name_match.end()..];
            let lines_to_end = remaining
                .find("\n\n")
                .map(|pos| remaining[..pos].matches('\n').count() as u32)
                .unwrap_or(10)
                .min(50);
            symbols.push(SymbolInfo::new(
                name_match.as_str(),
                kind,
                line_start,
                line_start + lines_to_end,
            ));
        }
    }
}
