use serde::{Deserialize, Serialize};

use crate::tokens::Component;
use crate::types::file::ContentType;

/// Ordered content-reduction strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    None,
    Low,
    Moderate,
    High,
    Extreme,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 5] = [
        CompressionLevel::None,
        CompressionLevel::Low,
        CompressionLevel::Moderate,
        CompressionLevel::High,
        CompressionLevel::Extreme,
    ];

    /// Next stronger level, or `None` at EXTREME
    pub fn next(self) -> Option<CompressionLevel> {
        match self {
            CompressionLevel::None => Some(CompressionLevel::Low),
            CompressionLevel::Low => Some(CompressionLevel::Moderate),
            CompressionLevel::Moderate => Some(CompressionLevel::High),
            CompressionLevel::High => Some(CompressionLevel::Extreme),
            CompressionLevel::Extreme => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::None => "none",
            CompressionLevel::Low => "low",
            CompressionLevel::Moderate => "moderate",
            CompressionLevel::High => "high",
            CompressionLevel::Extreme => "extreme",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Some(CompressionLevel::None),
            "low" => Some(CompressionLevel::Low),
            "moderate" => Some(CompressionLevel::Moderate),
            "high" => Some(CompressionLevel::High),
            "extreme" => Some(CompressionLevel::Extreme),
            _ => None,
        }
    }
}

/// One prepared file (or synthetic entry) in a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContext {
    pub path: String,
    pub content: String,
    pub content_type: ContentType,
    pub level: CompressionLevel,
    pub tokens: usize,
    pub relevance: f64,
    pub component: Component,
}

/// The prepared bundle returned to callers and stored in the cache
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextCollection {
    pub entries: Vec<FileContext>,
    pub total_tokens: usize,
    pub token_budget: usize,
    /// Budget could not be met, or the result is partial
    pub truncated: bool,
    /// Hex request fingerprint
    pub fingerprint: String,
    /// Index generation the bundle was built against
    pub generation: u64,
}

impl ContextCollection {
    pub fn new(fingerprint: impl Into<String>, token_budget: usize, generation: u64) -> Self {
        Self {
            entries: Vec::new(),
            total_tokens: 0,
            token_budget,
            truncated: false,
            fingerprint: fingerprint.into(),
            generation,
        }
    }

    pub fn push(&mut self, entry: FileContext) {
        self.total_tokens += entry.tokens;
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    /// The bundle either fits its budget or says it does not
    pub fn is_within_budget(&self) -> bool {
        self.total_tokens <= self.token_budget || self.truncated
    }

    /// Render as prompt text, one fenced section per entry
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!(
                "### {} ({}, {})\n```\n{}\n```\n\n",
                entry.path,
                entry.content_type.as_str(),
                entry.level.as_str(),
                entry.content.trim_end()
            ));
        }
        out
    }
}
