use super::CompressionStrategy;
use crate::config::CompressionConfig;
use crate::error::KerfError;
use crate::types::collection::CompressionLevel;

/// Generic line-based strategy; also the fallback for failed strategies
pub struct TextStrategy;

impl CompressionStrategy for TextStrategy {
    fn name(&self) -> &'static str {
        "text"
    }

    fn render(
        &self,
        content: &str,
        _language: &str,
        level: CompressionLevel,
        _config: &CompressionConfig,
    ) -> Result<String, KerfError> {
        Ok(match level {
            CompressionLevel::None => content.to_string(),
            CompressionLevel::Low => collapse_blank_lines(content),
            CompressionLevel::Moderate => drop_blank_lines(content),
            CompressionLevel::High => block_heads(content, 2, 100),
            CompressionLevel::Extreme => block_heads(content, 1, 80),
        })
    }
}

/// Trim trailing whitespace and squeeze runs of blank lines to one
pub(crate) fn collapse_blank_lines(content: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = false;
    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if blank_run || out.is_empty() {
                continue;
            }
            blank_run = true;
        } else {
            blank_run = false;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

pub(crate) fn drop_blank_lines(content: &str) -> String {
    content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `per_block` lines of each blank-separated block, each cut to
/// `max_chars`
pub(crate) fn block_heads(content: &str, per_block: usize, max_chars: usize) -> String {
    let mut out = Vec::new();
    let mut in_block = 0;
    for line in content.lines() {
        if line.trim().is_empty() {
            in_block = 0;
            continue;
        }
        if in_block < per_block {
            out.push(cut(line.trim_end(), max_chars));
        }
        in_block += 1;
    }
    out.join("\n")
}

/// Cut a line to at most `max_chars` characters
pub(crate) fn cut(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut s: String = line.chars().take(max_chars.saturating_sub(3)).collect();
    s.push_str("...");
    s
}
