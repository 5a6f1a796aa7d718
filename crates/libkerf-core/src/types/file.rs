use std::path::Path;

use serde::{Deserialize, Serialize};

/// Broad content category of an indexed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    StructuredSource,
    TestSource,
    Markdown,
    StructuredData,
    Config,
    Other,
}

impl ContentType {
    pub const ALL: [ContentType; 6] = [
        ContentType::StructuredSource,
        ContentType::TestSource,
        ContentType::Markdown,
        ContentType::StructuredData,
        ContentType::Config,
        ContentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::StructuredSource => "structured_source",
            ContentType::TestSource => "test_source",
            ContentType::Markdown => "markdown",
            ContentType::StructuredData => "structured_data",
            ContentType::Config => "config",
            ContentType::Other => "other",
        }
    }

    /// Classify a path by extension and test-naming conventions
    pub fn detect(path: &str) -> ContentType {
        let p = Path::new(path);
        let file_name = p
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let ext = p
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if is_source_extension(&ext) {
            if looks_like_test(path, &file_name) {
                return ContentType::TestSource;
            }
            return ContentType::StructuredSource;
        }

        match ext.as_str() {
            "md" | "markdown" | "rst" | "txt" | "adoc" => ContentType::Markdown,
            "json" | "yaml" | "yml" | "jsonl" | "geojson" => ContentType::StructuredData,
            "toml" | "ini" | "cfg" | "conf" | "env" | "properties" | "editorconfig" => {
                ContentType::Config
            }
            _ => match file_name.as_str() {
                "dockerfile" | "makefile" | ".env" | "procfile" | "justfile" => ContentType::Config,
                _ => ContentType::Other,
            },
        }
    }
}

fn is_source_extension(ext: &str) -> bool {
    matches!(
        ext,
        "py" | "pyi"
            | "rs"
            | "js"
            | "jsx"
            | "mjs"
            | "ts"
            | "tsx"
            | "go"
            | "java"
            | "kt"
            | "c"
            | "h"
            | "cpp"
            | "hpp"
            | "cc"
            | "rb"
            | "php"
            | "cs"
            | "swift"
            | "scala"
    )
}

fn looks_like_test(path: &str, file_name: &str) -> bool {
    let normalized = path.replace('\\', "/").to_ascii_lowercase();
    if normalized.starts_with("tests/")
        || normalized.starts_with("test/")
        || normalized.contains("/tests/")
        || normalized.contains("/test/")
        || normalized.contains("__tests__/")
    {
        return true;
    }
    let stem = file_name.split('.').next().unwrap_or("");
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_tests")
        || file_name.contains(".spec.")
        || file_name.contains(".test.")
        || stem == "conftest"
}

/// Detect the language family of a source file from its extension
pub fn detect_language(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("py") | Some("pyi") => "python",
        Some("rs") => "rust",
        Some("ts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("js") | Some("jsx") | Some("mjs") => "javascript",
        Some("go") => "go",
        Some("java") => "java",
        Some("kt") => "kotlin",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("hpp") | Some("cc") => "cpp",
        Some("rb") => "ruby",
        Some("php") => "php",
        Some("cs") => "csharp",
        Some("swift") => "swift",
        Some("scala") => "scala",
        Some("json") | Some("jsonl") | Some("geojson") => "json",
        Some("yaml") | Some("yml") => "yaml",
        Some("toml") => "toml",
        Some("md") | Some("markdown") => "markdown",
        Some("rst") | Some("txt") | Some("adoc") => "text",
        Some("ini") | Some("cfg") | Some("conf") | Some("env") | Some("properties") => "ini",
        _ => "unknown",
    }
}

/// Symbol information extracted from a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// function, method, class, struct, interface, const, import, key, ...
    pub kind: String,
    pub line_start: u32,
    pub line_end: u32,
}

impl SymbolInfo {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, line_start: u32, line_end: u32) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            line_start,
            line_end,
        }
    }

    /// Shape used for structural similarity: kind plus a name pattern
    /// (`get_*`, `*Service`, ...) rather than the exact name.
    pub fn shape(&self) -> String {
        let lower = self.name.to_ascii_lowercase();
        let head = lower
            .split(|c: char| c == '_' || c.is_ascii_digit())
            .find(|s| !s.is_empty())
            .unwrap_or("");
        format!("{}:{}", self.kind, head)
    }
}

/// Modification fingerprint of a file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Hex-encoded SHA-256 of the content
    pub content_hash: String,
    pub mtime_ms: u64,
    pub size: u64,
}

impl FileFingerprint {
    /// Cheap change check without reading content
    pub fn metadata_matches(&self, size: u64, mtime_ms: u64) -> bool {
        self.size == size && self.mtime_ms == mtime_ms
    }
}

/// Durable model of one project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Path relative to the project root, `/`-separated
    pub path: String,
    pub content_type: ContentType,
    pub language: String,
    pub size: u64,
    pub fingerprint: FileFingerprint,
    pub symbols: Vec<SymbolInfo>,
    /// Raw import specifiers as written in the file
    pub imports: Vec<String>,
    pub indexed_at_ms: u64,
    pub access_count: u64,
    /// Set when extraction failed and only metadata was indexed
    pub parse_failed: bool,
}

impl FileNode {
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols
            .iter()
            .filter(|s| s.kind != "import")
            .map(|s| s.name.as_str())
    }

    /// File name without extension (`src/auth.py` -> `auth`)
    pub fn stem(&self) -> &str {
        Path::new(&self.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.path)
    }
}

/// Kind of a dependency edge between two files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Imports,
    References,
    Contains,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Imports => "imports",
            EdgeKind::References => "references",
            EdgeKind::Contains => "contains",
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            EdgeKind::Imports => b'I',
            EdgeKind::References => b'R',
            EdgeKind::Contains => b'C',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(EdgeKind::Imports),
            b'R' => Some(EdgeKind::References),
            b'C' => Some(EdgeKind::Contains),
            _ => None,
        }
    }

    /// Default strength assigned to a freshly resolved edge
    pub fn default_strength(self) -> f32 {
        match self {
            EdgeKind::Imports => 1.0,
            EdgeKind::Contains => 0.8,
            EdgeKind::References => 0.5,
        }
    }
}

/// Directed dependency between two indexed files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    /// Connection strength in [0, 1]
    pub strength: f32,
}

impl DependencyEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind, strength: f32) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}
