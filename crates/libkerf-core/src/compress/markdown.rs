use std::sync::LazyLock;

use regex::Regex;

use super::text::collapse_blank_lines;
use super::CompressionStrategy;
use crate::config::CompressionConfig;
use crate::error::KerfError;
use crate::types::collection::CompressionLevel;

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}[ \t]+\S").unwrap());
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

/// Markdown and prose: headers always, then less and less of each section
pub struct MarkdownStrategy;

impl CompressionStrategy for MarkdownStrategy {
    fn name(&self) -> &'static str {
        "markdown"
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
            CompressionLevel::Low => collapse_blank_lines(&HTML_COMMENT.replace_all(content, "")),
            CompressionLevel::Moderate => render_sections(content, Keep::Paragraph),
            CompressionLevel::High => render_sections(content, Keep::Sentence),
            CompressionLevel::Extreme => render_sections(content, Keep::Nothing),
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Keep {
    Paragraph,
    Sentence,
    Nothing,
}

struct Section<'a> {
    heading: Option<&'a str>,
    body: Vec<&'a str>,
}

/// Split into sections at headings, ignoring fenced code
fn sections(content: &str) -> Vec<Section<'_>> {
    let mut out = vec![Section {
        heading: None,
        body: Vec::new(),
    }];
    let mut in_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if HEADING.is_match(line) {
            out.push(Section {
                heading: Some(line.trim_end()),
                body: Vec::new(),
            });
        } else if let Some(section) = out.last_mut() {
            section.body.push(line);
        }
    }
    out
}

/// Lines up to the first blank line after some text
fn first_paragraph<'a>(body: &[&'a str]) -> Vec<&'a str> {
    body.iter()
        .skip_while(|l| l.trim().is_empty())
        .take_while(|l| !l.trim().is_empty())
        .map(|l| l.trim_end())
        .collect()
}

fn first_sentence(paragraph: &[&str]) -> String {
    let joined = paragraph
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join(" ");
    for (idx, c) in joined.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = idx + c.len_utf8();
            if end == joined.len() || joined[end..].starts_with(' ') {
                return joined[..end].to_string();
            }
        }
    }
    joined
}

fn render_sections(content: &str, keep: Keep) -> String {
    let sections = sections(content);
    let has_headings = sections.iter().any(|s| s.heading.is_some());
    let mut out: Vec<String> = Vec::new();
    for section in &sections {
        if let Some(heading) = section.heading {
            out.push(heading.to_string());
        }
        let paragraph = first_paragraph(&section.body);
        if paragraph.is_empty() {
            continue;
        }
        match keep {
            Keep::Paragraph => out.extend(paragraph.iter().map(|l| l.to_string())),
            Keep::Sentence => out.push(first_sentence(&paragraph)),
            // Plain prose without headings keeps its opening line
            Keep::Nothing if !has_headings => out.push(paragraph[0].trim().to_string()),
            Keep::Nothing => {}
        }
    }
    out.join("\n")
}
