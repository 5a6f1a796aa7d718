//! Content compression ladder
//!
//! Each content type has a `CompressionStrategy` that renders a file at one
//! of five levels. `ContentCompressor::compress` walks the levels from a
//! starting point until the result fits the target, clamping so a stronger
//! level is never longer than a weaker one. If EXTREME still does not fit,
//! the text is hard-truncated by lines and flagged.

mod config_text;
mod data;
mod markdown;
mod source;
mod test_source;
mod text;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CompressionConfig;
use crate::error::KerfError;
use crate::tokens::TokenEstimator;
use crate::types::collection::CompressionLevel;
use crate::types::file::ContentType;

pub use config_text::ConfigTextStrategy;
pub use data::DataStrategy;
pub use markdown::MarkdownStrategy;
pub use source::SourceStrategy;
pub use test_source::TestSourceStrategy;
pub use text::TextStrategy;

/// Renders content at a given level for one family of content
pub trait CompressionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Render `content` at `level`. `Err` means this strategy cannot handle
    /// the content (e.g. it does not parse) and the generic text strategy
    /// should be used instead.
    fn render(
        &self,
        content: &str,
        language: &str,
        level: CompressionLevel,
        config: &CompressionConfig,
    ) -> Result<String, KerfError>;
}

/// Outcome of compressing one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compressed {
    pub content: String,
    pub level: CompressionLevel,
    pub tokens: usize,
    /// Hard truncation was applied at EXTREME
    pub truncated: bool,
    /// The content-type strategy failed and the generic text one was used
    pub fell_back: bool,
}

pub struct ContentCompressor {
    config: CompressionConfig,
    estimator: TokenEstimator,
    strategies: BTreeMap<ContentType, Box<dyn CompressionStrategy>>,
    fallback: Box<dyn CompressionStrategy>,
}

impl std::fmt::Debug for ContentCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: BTreeMap<&str, &str> = self
            .strategies
            .iter()
            .map(|(ct, s)| (ct.as_str(), s.name()))
            .collect();
        f.debug_struct("ContentCompressor")
            .field("strategies", &names)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl Default for ContentCompressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default(), TokenEstimator::default())
    }
}

impl ContentCompressor {
    pub fn new(config: CompressionConfig, estimator: TokenEstimator) -> Self {
        let mut strategies: BTreeMap<ContentType, Box<dyn CompressionStrategy>> = BTreeMap::new();
        strategies.insert(ContentType::StructuredSource, Box::new(SourceStrategy));
        strategies.insert(ContentType::TestSource, Box::new(TestSourceStrategy));
        strategies.insert(ContentType::Markdown, Box::new(MarkdownStrategy));
        strategies.insert(ContentType::StructuredData, Box::new(DataStrategy));
        strategies.insert(ContentType::Config, Box::new(ConfigTextStrategy));
        strategies.insert(ContentType::Other, Box::new(TextStrategy));
        Self {
            config,
            estimator,
            strategies,
            fallback: Box::new(TextStrategy),
        }
    }

    /// Replace the strategy for a content type
    pub fn set_strategy(&mut self, content_type: ContentType, strategy: Box<dyn CompressionStrategy>) {
        self.strategies.insert(content_type, strategy);
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn estimator(&self) -> TokenEstimator {
        self.estimator
    }

    /// Level a file of this relevance starts at
    pub fn start_level(&self, relevance: f64) -> CompressionLevel {
        let c = &self.config;
        if relevance >= c.none_threshold {
            CompressionLevel::None
        } else if relevance >= c.low_threshold {
            CompressionLevel::Low
        } else if relevance >= c.moderate_threshold {
            CompressionLevel::Moderate
        } else {
            CompressionLevel::High
        }
    }

    /// Compress `content` to fit `target_tokens`, starting at NONE
    pub fn compress(
        &self,
        path: &str,
        content: &str,
        content_type: ContentType,
        language: &str,
        target_tokens: usize,
    ) -> Compressed {
        self.compress_from(path, content, content_type, language, target_tokens, CompressionLevel::None)
    }

    /// Compress starting at `start`, escalating until the result fits
    pub fn compress_from(
        &self,
        path: &str,
        content: &str,
        content_type: ContentType,
        language: &str,
        target_tokens: usize,
        start: CompressionLevel,
    ) -> Compressed {
        let mut ladder = Ladder::new(self, path, content, content_type, language);
        let mut level = CompressionLevel::None;
        loop {
            let tokens = ladder.advance(level);
            if level >= start && tokens <= target_tokens {
                return ladder.finish(level, false);
            }
            match level.next() {
                Some(next) => level = next,
                None => break,
            }
        }

        let cut = hard_truncate(&ladder.current, target_tokens, self.config.extreme_max_lines, &self.estimator);
        ladder.current = cut;
        ladder.finish(CompressionLevel::Extreme, true)
    }

    /// Token counts at every level, clamped to be non-increasing
    pub fn level_tokens(&self, content: &str, content_type: ContentType, language: &str) -> Vec<(CompressionLevel, usize)> {
        let mut ladder = Ladder::new(self, "", content, content_type, language);
        CompressionLevel::ALL
            .iter()
            .map(|level| (*level, ladder.advance(*level)))
            .collect()
    }

    /// Render at exactly one level (clamped against the weaker levels)
    pub fn render_at(&self, content: &str, content_type: ContentType, language: &str, level: CompressionLevel) -> String {
        let mut ladder = Ladder::new(self, "", content, content_type, language);
        for l in CompressionLevel::ALL.iter().filter(|l| **l <= level) {
            ladder.advance(*l);
        }
        ladder.current
    }

    fn strategy(&self, content_type: ContentType) -> &dyn CompressionStrategy {
        self.strategies
            .get(&content_type)
            .map(|s| s.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }
}

/// Renders levels in order, keeping the shortest text seen so far
struct Ladder<'a> {
    compressor: &'a ContentCompressor,
    path: &'a str,
    content: &'a str,
    content_type: ContentType,
    language: &'a str,
    current: String,
    current_tokens: usize,
    fell_back: bool,
}

impl<'a> Ladder<'a> {
    fn new(
        compressor: &'a ContentCompressor,
        path: &'a str,
        content: &'a str,
        content_type: ContentType,
        language: &'a str,
    ) -> Self {
        Self {
            compressor,
            path,
            content,
            content_type,
            language,
            current: content.to_string(),
            current_tokens: compressor.estimator.estimate(content),
            fell_back: false,
        }
    }

    /// Render `level` and return the clamped token count
    fn advance(&mut self, level: CompressionLevel) -> usize {
        if level == CompressionLevel::None {
            return self.current_tokens;
        }
        let config = &self.compressor.config;
        let strategy: &dyn CompressionStrategy = if self.fell_back {
            self.compressor.fallback.as_ref()
        } else {
            self.compressor.strategy(self.content_type)
        };
        let rendered = match strategy.render(self.content, self.language, level, config) {
            Ok(text) => text,
            Err(e) => {
                if !self.fell_back {
                    warn!(
                        path = %self.path,
                        strategy = strategy.name(),
                        level = level.as_str(),
                        error = %e,
                        "compression strategy failed, using plain text"
                    );
                    self.fell_back = true;
                }
                match self.compressor.fallback.render(self.content, self.language, level, config) {
                    Ok(text) => text,
                    Err(_) => self.current.clone(),
                }
            }
        };
        let tokens = self.compressor.estimator.estimate(&rendered);
        if tokens <= self.current_tokens {
            self.current = rendered;
            self.current_tokens = tokens;
        }
        self.current_tokens
    }

    fn finish(self, level: CompressionLevel, truncated: bool) -> Compressed {
        let tokens = self.compressor.estimator.estimate(&self.current);
        Compressed {
            content: self.current,
            level,
            tokens,
            truncated,
            fell_back: self.fell_back,
        }
    }
}

const TRUNCATION_MARKER: &str = "... [truncated]";

/// Keep leading lines (at most `max_lines`) while they fit `target_tokens`.
///
/// A marker line is appended when it still fits. If not even the first
/// line fits, it is cut at a character boundary.
pub fn hard_truncate(content: &str, target_tokens: usize, max_lines: usize, estimator: &TokenEstimator) -> String {
    if target_tokens == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut kept = 0;
    let total_lines = content.lines().count();
    for line in content.lines().take(max_lines.max(1)) {
        let candidate = if kept == 0 {
            line.to_string()
        } else {
            format!("{}\n{}", out, line)
        };
        if estimator.estimate(&candidate) > target_tokens {
            break;
        }
        out = candidate;
        kept += 1;
    }

    if kept == 0 {
        let limit = estimator.chars_for(target_tokens);
        return content
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(limit)
            .collect();
    }

    if kept < total_lines {
        let with_marker = format!("{}\n{}", out, TRUNCATION_MARKER);
        if estimator.estimate(&with_marker) <= target_tokens {
            return with_marker;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PYTHON: &str = r#"import os


# Connection helpers
def connect(url):
    """Open a connection."""
    # strip scheme
    host = url.split("://")[1]
    return Connection(host)


class Connection:
    def __init__(self, host):
        self.host = host

    def close(self):
        pass
"#;

    fn compressor() -> ContentCompressor {
        ContentCompressor::default()
    }

    fn non_increasing(counts: &[(CompressionLevel, usize)]) -> bool {
        counts.windows(2).all(|w| w[1].1 <= w[0].1)
    }

    #[test]
    fn test_none_when_it_fits() {
        let out = compressor().compress("a.py", PYTHON, ContentType::StructuredSource, "python", 10_000);
        assert_eq!(out.level, CompressionLevel::None);
        assert_eq!(out.content, PYTHON);
        assert!(!out.truncated);
    }

    #[test]
    fn test_escalates_until_fit() {
        let c = compressor();
        let full = c.estimator().estimate(PYTHON);
        let out = c.compress("a.py", PYTHON, ContentType::StructuredSource, "python", full * 2 / 3);
        assert!(out.level > CompressionLevel::None);
        assert!(out.tokens <= full * 2 / 3);
        assert!(!out.truncated);
    }

    #[test]
    fn test_extreme_truncates_and_flags() {
        let c = compressor();
        let out = c.compress("a.py", PYTHON, ContentType::StructuredSource, "python", 3);
        assert_eq!(out.level, CompressionLevel::Extreme);
        assert!(out.truncated);
        assert!(out.tokens <= 3);
    }

    #[test]
    fn test_zero_target_is_empty() {
        let out = compressor().compress("a.py", PYTHON, ContentType::StructuredSource, "python", 0);
        assert!(out.content.is_empty());
        assert!(out.truncated);
    }

    #[test]
    fn test_start_level_from_relevance() {
        let c = compressor();
        assert_eq!(c.start_level(0.9), CompressionLevel::None);
        assert_eq!(c.start_level(0.5), CompressionLevel::Low);
        assert_eq!(c.start_level(0.3), CompressionLevel::Moderate);
        assert_eq!(c.start_level(0.05), CompressionLevel::High);
    }

    #[test]
    fn test_compress_from_respects_start() {
        let c = compressor();
        let out = c.compress_from("a.py", PYTHON, ContentType::StructuredSource, "python", 10_000, CompressionLevel::High);
        assert_eq!(out.level, CompressionLevel::High);
        assert!(!out.content.contains("self.host = host"));
    }

    #[cfg(feature = "syntax")]
    #[test]
    fn test_malformed_source_falls_back_to_text() {
        let broken = "def broken(:\n    # note\n    return 1\n\n\n\nx = 2\n";
        let c = compressor();
        let out = c.compress_from("b.py", broken, ContentType::StructuredSource, "python", 10_000, CompressionLevel::Moderate);
        assert!(out.fell_back);
        assert_eq!(out.level, CompressionLevel::Moderate);
    }

    #[test]
    fn test_levels_monotonic_for_each_type() {
        let c = compressor();
        let samples = [
            (ContentType::StructuredSource, "python", PYTHON),
            (ContentType::TestSource, "python", "import pytest\n\n\ndef test_login(client):\n    user = make_user()\n    resp = client.post('/login', user)\n    assert resp.status == 200\n"),
            (ContentType::Markdown, "markdown", "# Title\n\nIntro sentence. More detail here.\n\n## Usage\n\nRun it. Then stop.\n"),
            (ContentType::StructuredData, "json", "{\"name\": \"app\", \"deps\": {\"a\": \"1\", \"b\": [1, 2, 3]}}"),
            (ContentType::Config, "toml", "# Package\n[package]\nname = \"kerf\"\nversion = \"0.1.0\"\n"),
            (ContentType::Other, "unknown", "body {\n  color: red;\n}\n\n\nh1 { margin: 0; }\n"),
        ];
        for (ct, lang, content) in samples {
            let counts = c.level_tokens(content, ct, lang);
            assert!(non_increasing(&counts), "{:?}: {:?}", ct, counts);
        }
    }

    #[test]
    fn test_hard_truncate_marker() {
        let est = TokenEstimator::default();
        let content = (0..100).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let out = hard_truncate(&content, 20, 40, &est);
        assert!(est.estimate(&out) <= 20);
        assert!(out.starts_with("line 0\nline 1"));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_hard_truncate_keeps_leading_blank_lines() {
        let est = TokenEstimator::default();
        let content = "\n\nfirst\nsecond\nthird";
        let out = hard_truncate(content, 100, 3, &est);
        assert_eq!(out, format!("\n\nfirst\n{}", TRUNCATION_MARKER));
        // What was kept is a line prefix of the input
        let kept: Vec<&str> = out.lines().take(3).collect();
        let original: Vec<&str> = content.lines().take(3).collect();
        assert_eq!(kept, original);
    }

    proptest! {
        #[test]
        fn prop_compression_is_monotonic(
            content in "[a-z_(){}:#=\"\\[\\]., \\n]{0,400}",
            ct_idx in 0usize..6,
        ) {
            let c = compressor();
            let ct = ContentType::ALL[ct_idx];
            let lang = match ct {
                ContentType::StructuredSource | ContentType::TestSource => "python",
                ContentType::Markdown => "markdown",
                ContentType::StructuredData => "json",
                ContentType::Config => "toml",
                ContentType::Other => "unknown",
            };
            let counts = c.level_tokens(&content, ct, lang);
            prop_assert!(non_increasing(&counts));
        }

        #[test]
        fn prop_result_fits_or_is_truncated(
            content in "[a-z \\n]{0,600}",
            target in 0usize..200,
        ) {
            let c = compressor();
            let out = c.compress("x.txt", &content, ContentType::Other, "unknown", target);
            prop_assert!(out.tokens <= target || out.truncated);
            prop_assert!(out.tokens <= target);
        }
    }
}
