//! Pluggable structure extraction
//!
//! A `StructureExtractor` turns file content into symbols and raw import
//! specifiers. The registry picks the first extractor that claims a
//! (content type, language) pair, so adding a language never touches the
//! index, the filter or the compressor.

pub mod data_keys;
pub mod imports;
pub mod regex_fallback;
#[cfg(feature = "syntax")]
pub mod ts_engine;

use tracing::warn;

use crate::error::KerfError;
use crate::types::file::{ContentType, SymbolInfo};

/// Output of one extraction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub symbols: Vec<SymbolInfo>,
    /// Import specifiers as written (`db`, `.models`, `./api`, `crate::x`, `mod:x`)
    pub imports: Vec<String>,
    /// Extraction failed; only metadata should be indexed
    pub parse_failed: bool,
}

impl Extraction {
    pub fn metadata_only() -> Self {
        Self {
            symbols: Vec::new(),
            imports: Vec::new(),
            parse_failed: true,
        }
    }

    /// Symbols not nested inside another symbol's line span
    pub fn top_level(&self) -> Vec<&SymbolInfo> {
        top_level_symbols(&self.symbols)
    }
}

/// Symbols not nested inside another symbol's line span
pub fn top_level_symbols(symbols: &[SymbolInfo]) -> Vec<&SymbolInfo> {
    symbols
        .iter()
        .filter(|s| s.kind != "import")
        .filter(|s| {
            !symbols.iter().any(|outer| {
                !std::ptr::eq(*s, outer)
                    && outer.kind != "import"
                    && outer.line_start <= s.line_start
                    && outer.line_end >= s.line_end
                    && (outer.line_start, outer.line_end) != (s.line_start, s.line_end)
            })
        })
        .collect()
}

/// Extracts structure from one family of content
pub trait StructureExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this extractor handles the given content
    fn supports(&self, content_type: ContentType, language: &str) -> bool;

    /// Extract symbols and imports. An `Err` means the content is malformed.
    fn extract(&self, content: &str, language: &str) -> Result<Extraction, KerfError>;
}

/// Ordered set of extractors; first match wins
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn StructureExtractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.extractors.iter().map(|e| e.name()).collect();
        f.debug_struct("ExtractorRegistry").field("extractors", &names).finish()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Syntax-tree extractors (when built with `syntax`), data keys, then regex fallback
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        #[cfg(feature = "syntax")]
        registry.push(Box::new(ts_engine::SyntaxTreeExtractor));
        registry.push(Box::new(data_keys::DataKeyExtractor));
        registry.push(Box::new(regex_fallback::RegexExtractor));
        registry
    }

    /// Append at the lowest priority
    pub fn push(&mut self, extractor: Box<dyn StructureExtractor>) {
        self.extractors.push(extractor);
    }

    /// Insert ahead of the built-ins
    pub fn register(&mut self, extractor: Box<dyn StructureExtractor>) {
        self.extractors.insert(0, extractor);
    }

    pub fn find(&self, content_type: ContentType, language: &str) -> Option<&dyn StructureExtractor> {
        self.extractors
            .iter()
            .find(|e| e.supports(content_type, language))
            .map(|e| e.as_ref())
    }

    /// Extract structure, absorbing failures.
    ///
    /// Malformed content yields `Extraction::metadata_only()` and a warning;
    /// content no extractor claims yields an empty extraction.
    pub fn extract(&self, path: &str, content_type: ContentType, language: &str, content: &str) -> Extraction {
        let Some(extractor) = self.find(content_type, language) else {
            return Extraction::default();
        };
        match extractor.extract(content, language) {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(
                    path = %path,
                    extractor = extractor.name(),
                    error = %e,
                    "extraction failed, indexing metadata only"
                );
                Extraction::metadata_only()
            }
        }
    }
}

/// Short summary of a file based on its symbols
pub fn generate_summary(symbols: &[SymbolInfo], language: &str) -> String {
    let display_language = match language {
        "typescriptreact" => "typescript",
        other => other,
    };

    let types: Vec<&str> = symbols
        .iter()
        .filter(|s| matches!(s.kind.as_str(), "struct" | "class" | "interface" | "enum" | "trait"))
        .map(|s| s.name.as_str())
        .collect();
    let functions = symbols
        .iter()
        .filter(|s| s.kind == "function" || s.kind == "method")
        .count();

    let mut parts = Vec::new();
    if !types.is_empty() {
        let names = types.iter().take(3).copied().collect::<Vec<_>>().join(", ");
        if types.len() > 3 {
            parts.push(format!("defines {} (+{} more)", names, types.len() - 3));
        } else {
            parts.push(format!("defines {}", names));
        }
    }
    if functions > 0 {
        parts.push(format!("{} functions", functions));
    }

    if parts.is_empty() {
        format!("{} file", display_language)
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shouty;

    impl StructureExtractor for Shouty {
        fn name(&self) -> &'static str {
            "shouty"
        }

        fn supports(&self, _content_type: ContentType, language: &str) -> bool {
            language == "python"
        }

        fn extract(&self, content: &str, _language: &str) -> Result<Extraction, KerfError> {
            Ok(Extraction {
                symbols: vec![SymbolInfo::new(content.to_uppercase(), "shout", 1, 1)],
                imports: vec![],
                parse_failed: false,
            })
        }
    }

    #[test]
    fn test_registered_extractor_wins() {
        let mut registry = ExtractorRegistry::with_defaults();
        registry.register(Box::new(Shouty));
        let out = registry.extract("a.py", ContentType::StructuredSource, "python", "hi");
        assert_eq!(out.symbols[0].name, "HI");
    }

    #[test]
    fn test_unclaimed_content_is_empty() {
        let registry = ExtractorRegistry::empty();
        let out = registry.extract("a.css", ContentType::Other, "unknown", "body {}");
        assert_eq!(out, Extraction::default());
    }

    #[test]
    fn test_malformed_data_is_metadata_only() {
        let registry = ExtractorRegistry::with_defaults();
        let out = registry.extract("a.json", ContentType::StructuredData, "json", "{\"a\": ");
        assert!(out.parse_failed);
        assert!(out.symbols.is_empty());
    }

    #[test]
    fn test_top_level_symbols() {
        let symbols = vec![
            SymbolInfo::new("Auth", "class", 1, 10),
            SymbolInfo::new("login", "function", 2, 5),
            SymbolInfo::new("helper", "function", 12, 14),
            SymbolInfo::new("os", "import", 1, 1),
        ];
        let top: Vec<&str> = top_level_symbols(&symbols).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(top, vec!["Auth", "helper"]);
    }

    #[test]
    fn test_generate_summary() {
        let symbols = vec![
            SymbolInfo::new("Session", "class", 1, 10),
            SymbolInfo::new("login", "function", 12, 20),
        ];
        assert_eq!(generate_summary(&symbols, "python"), "defines Session; 1 functions");
        assert_eq!(generate_summary(&[], "typescriptreact"), "typescript file");
    }
}
