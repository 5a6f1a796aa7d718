use std::sync::LazyLock;

use regex::Regex;

use super::source::SourceStrategy;
use super::text::collapse_blank_lines;
use super::CompressionStrategy;
use crate::config::CompressionConfig;
use crate::error::KerfError;
use crate::types::collection::CompressionLevel;

static TEST_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[ \t]*(?:(?:pub\s+)?(?:async\s+)?(?:def|fn|func)\s+\w+|(?:async\s+)?function\s+\w+|(?:it|test|describe|context)\s*\(|class\s+\w+|#\[(?:tokio::)?test|@pytest|@Test)",
    )
    .unwrap()
});

static ASSERTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:assert\w*!?|expect|should|raises|t\.(?:Error|Fatal|Fail)\w*|require\.\w+|verify)\b").unwrap()
});

/// Test code: assertions and test signatures always survive; setup and
/// fixture lines go first
pub struct TestSourceStrategy;

impl CompressionStrategy for TestSourceStrategy {
    fn name(&self) -> &'static str {
        "test-source"
    }

    fn render(
        &self,
        content: &str,
        language: &str,
        level: CompressionLevel,
        config: &CompressionConfig,
    ) -> Result<String, KerfError> {
        match level {
            CompressionLevel::None => Ok(content.to_string()),
            CompressionLevel::Low => Ok(collapse_blank_lines(content)),
            // Comments and blank lines, as for regular source
            CompressionLevel::Moderate => SourceStrategy.render(content, language, level, config),
            CompressionLevel::High => Ok(skeleton(content, false)),
            CompressionLevel::Extreme => Ok(skeleton(content, true)),
        }
    }
}

/// Lines an assertion may span before its brackets are given up on
const MAX_CONTINUATION: usize = 40;

/// Keep test signatures and assertions. An assertion whose brackets are
/// still open at the end of its line keeps its continuation lines too.
fn skeleton(content: &str, flatten: bool) -> String {
    let mut kept = Vec::new();
    let mut open = 0;
    let mut braces = false;
    let mut span = 0;
    for line in content.lines() {
        if open > 0 && span < MAX_CONTINUATION {
            open += bracket_balance(line, braces);
            span += 1;
            if line.trim().is_empty() {
                continue;
            }
        } else if TEST_SIGNATURE.is_match(line) {
            // Only a wrapped parameter list continues a signature, never its body
            open = if line.contains('{') { 0 } else { bracket_balance(line, false) };
            braces = false;
            span = 0;
        } else if ASSERTION.is_match(line) {
            open = bracket_balance(line, true);
            braces = true;
            span = 0;
        } else {
            open = 0;
            continue;
        }
        kept.push(if flatten { line.trim() } else { line.trim_end() });
    }
    kept.join("\n")
}

/// Opened minus closed brackets on a line, ignoring quoted text
fn bracket_balance(line: &str, braces: bool) -> i32 {
    let mut balance = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' => balance += 1,
            ')' | ']' => balance -= 1,
            '{' if braces => balance += 1,
            '}' if braces => balance -= 1,
            _ => {}
        }
    }
    balance
}
