//! Import statement extraction and resolution to indexed paths

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::file::{EdgeKind, SymbolInfo};

static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)").unwrap());
static PY_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*from\s+(\.*[\w.]*)\s+import[ \t]+\(?[ \t]*([\w \t,*]+)").unwrap());
static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:^[ \t]*import\s+(?:[^'"]*?\s+from\s+)?|^[ \t]*export\s+[^'"]*?\s+from\s+|require\(\s*|import\(\s*)['"]([^'"]+)['"]"#)
        .unwrap()
});
static RUST_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?use\s+([\w:]+)").unwrap());
static RUST_MOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)\s*;").unwrap());
static GO_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^[ \t]*import\s+(?:\w+\s+)?"([^"]+)""#).unwrap());
static GO_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)import\s*\(([^)]*)\)"#).unwrap());
static GO_BLOCK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:\w+\s+)?"([^"]+)""#).unwrap());
static GENERIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:import|require|include|using|#include)\s+[<"]?([\w./:\\-]+)[>"]?"#).unwrap()
});

/// A raw import specifier and the line it appears on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub spec: String,
    pub line: u32,
}

fn line_of(content: &str, byte: usize) -> u32 {
    content[..byte].matches('\n').count() as u32 + 1
}

/// Extract import specifiers for a language.
///
/// Python relative imports keep their leading dots (`.db`); Rust `mod x;`
/// declarations are reported as `mod:x`.
pub fn extract_imports(content: &str, language: &str) -> Vec<ImportRef> {
    let mut out = Vec::new();
    match language {
        "python" => {
            for cap in PY_IMPORT.captures_iter(content) {
                let (Some(whole), Some(list)) = (cap.get(0), cap.get(1)) else { continue };
                let line = line_of(content, whole.start());
                for item in list.as_str().split(',') {
                    let module = item.split_whitespace().next().unwrap_or("");
                    if !module.is_empty() {
                        out.push(ImportRef { spec: module.to_string(), line });
                    }
                }
            }
            for cap in PY_FROM.captures_iter(content) {
                let (Some(whole), Some(module)) = (cap.get(0), cap.get(1)) else { continue };
                let line = line_of(content, whole.start());
                let module = module.as_str();
                if module.chars().all(|c| c == '.') {
                    // `from . import db, models`
                    let names = cap.get(2).map(|m| m.as_str()).unwrap_or("");
                    for name in names.split(',') {
                        let name = name.split_whitespace().next().unwrap_or("");
                        if !name.is_empty() && name != "*" {
                            out.push(ImportRef { spec: format!("{}{}", module, name), line });
                        }
                    }
                } else {
                    out.push(ImportRef { spec: module.to_string(), line });
                }
            }
        }
        "javascript" | "typescript" | "typescriptreact" => {
            for cap in JS_IMPORT.captures_iter(content) {
                if let (Some(whole), Some(spec)) = (cap.get(0), cap.get(1)) {
                    out.push(ImportRef {
                        spec: spec.as_str().to_string(),
                        line: line_of(content, whole.start()),
                    });
                }
            }
        }
        "rust" => {
            for cap in RUST_USE.captures_iter(content) {
                if let (Some(whole), Some(spec)) = (cap.get(0), cap.get(1)) {
                    out.push(ImportRef {
                        spec: spec.as_str().trim_end_matches("::").to_string(),
                        line: line_of(content, whole.start()),
                    });
                }
            }
            for cap in RUST_MOD.captures_iter(content) {
                if let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) {
                    out.push(ImportRef {
                        spec: format!("mod:{}", name.as_str()),
                        line: line_of(content, whole.start()),
                    });
                }
            }
        }
        "go" => {
            for cap in GO_SINGLE.captures_iter(content) {
                if let (Some(whole), Some(spec)) = (cap.get(0), cap.get(1)) {
                    out.push(ImportRef {
                        spec: spec.as_str().to_string(),
                        line: line_of(content, whole.start()),
                    });
                }
            }
            for block in GO_BLOCK.captures_iter(content) {
                let Some(body) = block.get(1) else { continue };
                for cap in GO_BLOCK_LINE.captures_iter(body.as_str()) {
                    if let Some(spec) = cap.get(1) {
                        out.push(ImportRef {
                            spec: spec.as_str().to_string(),
                            line: line_of(content, body.start() + spec.start()),
                        });
                    }
                }
            }
        }
        "unknown" | "json" | "yaml" | "toml" | "markdown" | "text" | "ini" => {}
        _ => {
            for cap in GENERIC_IMPORT.captures_iter(content) {
                if let (Some(whole), Some(spec)) = (cap.get(0), cap.get(1)) {
                    out.push(ImportRef {
                        spec: spec.as_str().to_string(),
                        line: line_of(content, whole.start()),
                    });
                }
            }
        }
    }

    out.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.spec.cmp(&b.spec)));
    let mut seen = BTreeSet::new();
    out.retain(|i| seen.insert(i.spec.clone()));
    out
}

/// Import symbols for the file's symbol list
pub fn import_symbols(imports: &[ImportRef]) -> Vec<SymbolInfo> {
    imports
        .iter()
        .filter(|i| !i.spec.starts_with("mod:"))
        .map(|i| SymbolInfo::new(i.spec.clone(), "import", i.line, i.line))
        .collect()
}

/// Resolve an import specifier from `source` to indexed paths.
///
/// `known` is the set of indexed paths (root-relative, `/`-separated).
/// Unresolvable specifiers (third-party packages) resolve to nothing.
pub fn resolve_import(
    source: &str,
    spec: &str,
    language: &str,
    known: &BTreeSet<String>,
) -> Vec<(String, EdgeKind)> {
    let dir = parent_dir(source);
    let found: Vec<String> = match language {
        "python" => resolve_python(&dir, spec, known),
        "javascript" | "typescript" | "typescriptreact" => resolve_js(&dir, spec, known),
        "rust" => {
            if let Some(module) = spec.strip_prefix("mod:") {
                return resolve_rust_mod(source, module, known)
                    .into_iter()
                    .map(|p| (p, EdgeKind::Contains))
                    .collect();
            }
            resolve_rust_use(source, spec, known)
        }
        "go" => resolve_go(spec, known),
        _ => resolve_generic(&dir, spec, known),
    };

    found
        .into_iter()
        .filter(|p| p != source)
        .map(|p| (p, EdgeKind::Imports))
        .collect()
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        dir.to_string()
    } else {
        format!("{}/{}", dir, rel)
    }
}

/// Collapse `.` and `..` segments; `None` if the path escapes the root
pub fn normalize_rel(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn first_known(candidates: &[String], known: &BTreeSet<String>) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| normalize_rel(c))
        .find(|c| known.contains(c))
}

fn resolve_python(dir: &str, spec: &str, known: &BTreeSet<String>) -> Vec<String> {
    let dots = spec.chars().take_while(|c| *c == '.').count();
    let module_path = spec[dots..].replace('.', "/");

    let mut bases: Vec<String> = Vec::new();
    if dots > 0 {
        let mut base = dir.to_string();
        for _ in 1..dots {
            base = parent_dir(&base);
        }
        bases.push(base);
    } else {
        bases.push(String::new());
        bases.push(dir.to_string());
        bases.push("src".to_string());
    }

    for base in bases {
        let stem = join(&base, &module_path);
        let candidates = vec![format!("{}.py", stem), format!("{}/__init__.py", stem)];
        if let Some(found) = first_known(&candidates, known) {
            return vec![found];
        }
        // `from pkg.mod import Name` where Name is not a module
        if let Some((parent, _)) = module_path.rsplit_once('/') {
            let stem = join(&base, parent);
            if let Some(found) = first_known(&[format!("{}.py", stem)], known) {
                return vec![found];
            }
        }
    }
    Vec::new()
}

const JS_EXTENSIONS: &[&str] = &["", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".d.ts"];

fn resolve_js(dir: &str, spec: &str, known: &BTreeSet<String>) -> Vec<String> {
    if !spec.starts_with('.') && !spec.starts_with('/') {
        return Vec::new();
    }
    let stem = match spec.strip_prefix('/') {
        Some(rooted) => rooted.to_string(),
        None => join(dir, spec),
    };
    let mut candidates: Vec<String> = JS_EXTENSIONS.iter().map(|ext| format!("{}{}", stem, ext)).collect();
    for index in ["index.ts", "index.tsx", "index.js"] {
        candidates.push(format!("{}/{}", stem, index));
    }
    first_known(&candidates, known).into_iter().collect()
}

/// Directory holding `src/` for a Rust source path
fn rust_crate_src(source: &str) -> String {
    match source.rfind("src/") {
        Some(idx) => source[..idx + 3].to_string(),
        None => parent_dir(source),
    }
}

/// Directory that child modules of `source` live in
fn rust_module_dir(source: &str) -> String {
    let dir = parent_dir(source);
    let file = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    match file {
        "main" | "lib" | "mod" => dir,
        other => join(&dir, other),
    }
}

fn resolve_rust_mod(source: &str, module: &str, known: &BTreeSet<String>) -> Vec<String> {
    let dir = rust_module_dir(source);
    let candidates = vec![
        join(&dir, &format!("{}.rs", module)),
        join(&dir, &format!("{}/mod.rs", module)),
    ];
    first_known(&candidates, known).into_iter().collect()
}

fn resolve_rust_use(source: &str, spec: &str, known: &BTreeSet<String>) -> Vec<String> {
    let mut segments: Vec<&str> = spec.split("::").filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Vec::new();
    }
    let base = match segments[0] {
        "crate" => {
            segments.remove(0);
            rust_crate_src(source)
        }
        "self" => {
            segments.remove(0);
            rust_module_dir(source)
        }
        "super" => {
            let mut dir = rust_module_dir(source);
            while segments.first() == Some(&"super") {
                segments.remove(0);
                dir = parent_dir(&dir);
            }
            dir
        }
        _ => return Vec::new(),
    };

    // Longest module prefix that exists wins (`crate::db::pool::Pool` -> src/db/pool.rs)
    while !segments.is_empty() {
        let rel = segments.join("/");
        let candidates = vec![
            join(&base, &format!("{}.rs", rel)),
            join(&base, &format!("{}/mod.rs", rel)),
        ];
        if let Some(found) = first_known(&candidates, known) {
            return vec![found];
        }
        segments.pop();
    }

    // `use super::Name` / `use crate::Name`: the module file itself
    let candidates = vec![
        format!("{}.rs", base),
        join(&base, "mod.rs"),
        join(&base, "lib.rs"),
        join(&base, "main.rs"),
    ];
    first_known(&candidates, known).into_iter().collect()
}

fn resolve_go(spec: &str, known: &BTreeSet<String>) -> Vec<String> {
    // Match the longest suffix of the import path against indexed directories
    let segments: Vec<&str> = spec.split('/').collect();
    for start in 0..segments.len() {
        let suffix = segments[start..].join("/");
        let files: Vec<String> = known
            .iter()
            .filter(|p| p.ends_with(".go") && !p.ends_with("_test.go"))
            .filter(|p| {
                let dir = parent_dir(p);
                dir == suffix || dir.ends_with(&format!("/{}", suffix))
            })
            .cloned()
            .collect();
        if !files.is_empty() {
            return files;
        }
    }
    Vec::new()
}

fn resolve_generic(dir: &str, spec: &str, known: &BTreeSet<String>) -> Vec<String> {
    let rel = spec.replace("::", "/").replace('\\', "/");
    let candidates = vec![join(dir, &rel), rel.clone()];
    first_known(&candidates, known).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    fn specs(imports: &[ImportRef]) -> Vec<&str> {
        imports.iter().map(|i| i.spec.as_str()).collect()
    }

    #[test]
    fn test_python_imports() {
        let content = "import os, sys as system\nfrom db import connect\nfrom . import models, utils\nfrom ..core.auth import Session\n";
        let imports = extract_imports(content, "python");
        let s = specs(&imports);
        assert!(s.contains(&"os"));
        assert!(s.contains(&"sys"));
        assert!(s.contains(&"db"));
        assert!(s.contains(&".models"));
        assert!(s.contains(&".utils"));
        assert!(s.contains(&"..core.auth"));
        let db = imports.iter().find(|i| i.spec == "db").unwrap();
        assert_eq!(db.line, 2);
    }

    #[test]
    fn test_js_imports() {
        let content = "import { a } from './api';\nimport React from 'react';\nconst x = require('../lib/x');\nexport * from './types';\nimport './side-effect';\n";
        let s: Vec<String> = extract_imports(content, "typescript").into_iter().map(|i| i.spec).collect();
        assert!(s.contains(&"./api".to_string()));
        assert!(s.contains(&"react".to_string()));
        assert!(s.contains(&"../lib/x".to_string()));
        assert!(s.contains(&"./types".to_string()));
        assert!(s.contains(&"./side-effect".to_string()));
    }

    #[test]
    fn test_rust_imports() {
        let content = "use std::fmt;\npub use crate::db::pool::Pool;\nmod config;\npub(crate) mod store;\n";
        let imports = extract_imports(content, "rust");
        let s = specs(&imports);
        assert!(s.contains(&"std::fmt"));
        assert!(s.contains(&"crate::db::pool::Pool"));
        assert!(s.contains(&"mod:config"));
        assert!(s.contains(&"mod:store"));
        // mod declarations are edges, not import symbols
        assert_eq!(import_symbols(&imports).len(), 2);
    }

    #[test]
    fn test_go_imports() {
        let content = "package main\n\nimport \"fmt\"\n\nimport (\n\t\"os\"\n\tauth \"example.com/app/internal/auth\"\n)\n";
        let imports = extract_imports(content, "go");
        let s = specs(&imports);
        assert!(s.contains(&"fmt"));
        assert!(s.contains(&"os"));
        assert!(s.contains(&"example.com/app/internal/auth"));
    }

    #[test]
    fn test_resolve_python() {
        let k = known(&["auth.py", "db.py", "pkg/__init__.py", "pkg/models.py", "pkg/sub/views.py"]);
        assert_eq!(resolve_import("auth.py", "db", "python", &k), vec![("db.py".to_string(), EdgeKind::Imports)]);
        assert_eq!(
            resolve_import("pkg/sub/views.py", "..models", "python", &k),
            vec![("pkg/models.py".to_string(), EdgeKind::Imports)]
        );
        assert_eq!(
            resolve_import("auth.py", "pkg.models", "python", &k)[0].0,
            "pkg/models.py"
        );
        assert_eq!(resolve_import("auth.py", "pkg", "python", &k)[0].0, "pkg/__init__.py");
        assert!(resolve_import("auth.py", "requests", "python", &k).is_empty());
    }

    #[test]
    fn test_resolve_js() {
        let k = known(&["src/app.ts", "src/api/index.ts", "src/util.js"]);
        assert_eq!(resolve_import("src/app.ts", "./api", "typescript", &k)[0].0, "src/api/index.ts");
        assert_eq!(resolve_import("src/app.ts", "./util", "typescript", &k)[0].0, "src/util.js");
        assert!(resolve_import("src/app.ts", "react", "typescript", &k).is_empty());
    }

    #[test]
    fn test_resolve_rust() {
        let k = known(&["src/main.rs", "src/config.rs", "src/db/mod.rs", "src/db/pool.rs"]);
        assert_eq!(
            resolve_import("src/main.rs", "mod:config", "rust", &k),
            vec![("src/config.rs".to_string(), EdgeKind::Contains)]
        );
        assert_eq!(resolve_import("src/main.rs", "crate::db::pool::Pool", "rust", &k)[0].0, "src/db/pool.rs");
        assert_eq!(resolve_import("src/db/pool.rs", "super::Db", "rust", &k)[0].0, "src/db/mod.rs");
        assert!(resolve_import("src/main.rs", "std::fmt", "rust", &k).is_empty());
    }

    #[test]
    fn test_resolve_go() {
        let k = known(&["cmd/main.go", "internal/auth/auth.go", "internal/auth/auth_test.go"]);
        let found = resolve_import("cmd/main.go", "example.com/app/internal/auth", "go", &k);
        assert_eq!(found, vec![("internal/auth/auth.go".to_string(), EdgeKind::Imports)]);
    }

    #[test]
    fn test_normalize_rel() {
        assert_eq!(normalize_rel("a/./b/../c.py").as_deref(), Some("a/c.py"));
        assert_eq!(normalize_rel("../x"), None);
    }
}
