use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::text::{collapse_blank_lines, drop_blank_lines};
use super::CompressionStrategy;
use crate::config::CompressionConfig;
use crate::error::KerfError;
use crate::extractor::imports::extract_imports;
use crate::extractor::{regex_fallback, top_level_symbols};
use crate::types::collection::CompressionLevel;
use crate::types::file::SymbolInfo;

#[cfg(feature = "syntax")]
use crate::extractor::{ts_engine, StructureExtractor};

static CONST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:pub\s+)?(?:export\s+)?(?:const|static|final|let|var)?\s*[A-Z][A-Z0-9_]{2,}\s*[:=]").unwrap()
});

/// Structured source: comments, then bodies, then everything but the
/// top-level outline
pub struct SourceStrategy;

impl CompressionStrategy for SourceStrategy {
    fn name(&self) -> &'static str {
        "source"
    }

    fn render(
        &self,
        content: &str,
        language: &str,
        level: CompressionLevel,
        _config: &CompressionConfig,
    ) -> Result<String, KerfError> {
        match level {
            CompressionLevel::None => Ok(content.to_string()),
            CompressionLevel::Low => Ok(collapse_blank_lines(content)),
            CompressionLevel::Moderate => Ok(drop_blank_lines(&strip_comments(content, language)?)),
            CompressionLevel::High => Ok(drop_blank_lines(&signatures(content, language)?)),
            CompressionLevel::Extreme => Ok(outline(&symbols(content, language)?)),
        }
    }
}

fn strip_comments(content: &str, language: &str) -> Result<String, KerfError> {
    #[cfg(feature = "syntax")]
    if ts_engine::has_grammar(language) {
        return ts_engine::strip_comments(content, language)
            .ok_or_else(|| KerfError::Compression(format!("cannot parse {} source", language)));
    }
    Ok(strip_line_comments(content, language))
}

/// Signatures, docstrings and constants with function bodies elided
fn signatures(content: &str, language: &str) -> Result<String, KerfError> {
    #[cfg(feature = "syntax")]
    if ts_engine::has_grammar(language) {
        let stripped = strip_comments(content, language)?;
        return ts_engine::elide_bodies(&stripped, language)
            .ok_or_else(|| KerfError::Compression(format!("cannot parse {} source", language)));
    }
    signature_lines(content, language)
}

fn symbols(content: &str, language: &str) -> Result<Vec<SymbolInfo>, KerfError> {
    #[cfg(feature = "syntax")]
    if ts_engine::has_grammar(language) {
        return Ok(ts_engine::SyntaxTreeExtractor.extract(content, language)?.symbols);
    }
    Ok(regex_fallback::extract(content, language))
}

/// `kind name` for each top-level symbol
fn outline(symbols: &[SymbolInfo]) -> String {
    top_level_symbols(symbols)
        .iter()
        .map(|s| format!("{} {}", s.kind, s.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn comment_prefixes(language: &str) -> &'static [&'static str] {
    match language {
        "python" | "ruby" => &["#"],
        "php" => &["//", "#"],
        _ => &["//"],
    }
}

/// Drop whole-line comments, keeping doc comments
fn strip_line_comments(content: &str, language: &str) -> String {
    let prefixes = comment_prefixes(language);
    content
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            if t.starts_with("///") || t.starts_with("//!") || t.starts_with("#!") {
                return true;
            }
            !prefixes.iter().any(|p| t.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lines that declare symbols, imports or constants
fn signature_lines(content: &str, language: &str) -> Result<String, KerfError> {
    let mut keep: BTreeSet<u32> = regex_fallback::extract(content, language)
        .iter()
        .map(|s| s.line_start)
        .collect();
    keep.extend(extract_imports(content, language).iter().map(|i| i.line));

    let lines: Vec<&str> = content.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        if CONST_LINE.is_match(line.trim_start()) && !line.starts_with(char::is_whitespace) {
            keep.insert(idx as u32 + 1);
        }
    }
    Ok(keep
        .iter()
        .filter_map(|n| lines.get(*n as usize - 1))
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n"))
}
