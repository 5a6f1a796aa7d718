use std::sync::LazyLock;

use regex::Regex;

use super::text::{cut, drop_blank_lines};
use super::CompressionStrategy;
use crate::config::CompressionConfig;
use crate::error::KerfError;
use crate::types::collection::CompressionLevel;

static SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ \t]*(\[+[^\]]+\]+)[ \t]*$").unwrap());
static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*(?:export[ \t]+)?[A-Za-z_][\w.-]*[ \t]*[=:])[ \t]*(.*)$").unwrap());

const VALUE_CHARS: usize = 24;
const LINE_CHARS: usize = 40;

/// Line-oriented config files (ini, env, properties, conf)
pub struct ConfigTextStrategy;

impl CompressionStrategy for ConfigTextStrategy {
    fn name(&self) -> &'static str {
        "config"
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
            CompressionLevel::Low => drop_blank_lines(content),
            CompressionLevel::Moderate => map_lines(content, true, |line| match ASSIGNMENT.captures(line) {
                Some(cap) => format!("{} {}", &cap[1], cut(&cap[2], VALUE_CHARS)).trim_end().to_string(),
                None => line.to_string(),
            }),
            CompressionLevel::High => map_lines(content, false, |line| {
                if SECTION.is_match(line) {
                    line.trim().to_string()
                } else if let Some(cap) = ASSIGNMENT.captures(line) {
                    format!("{} \u{2026}", &cap[1])
                } else {
                    cut(line, LINE_CHARS)
                }
            }),
            CompressionLevel::Extreme => key_summary(content),
        })
    }
}

fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('#') || t.starts_with(';') || t.starts_with("//")
}

fn map_lines(content: &str, keep_comments: bool, f: impl Fn(&str) -> String) -> String {
    content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .filter(|l| keep_comments || !is_comment(l))
        .map(f)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `[section] key, key` per section; keys before any section come first
fn key_summary(content: &str) -> String {
    let mut groups: Vec<(Option<String>, Vec<String>)> = vec![(None, Vec::new())];
    for line in content.lines() {
        if is_comment(line) {
            continue;
        }
        if let Some(cap) = SECTION.captures(line) {
            groups.push((Some(cap[1].to_string()), Vec::new()));
        } else if let Some(cap) = ASSIGNMENT.captures(line) {
            let key = cap[1]
                .trim()
                .trim_end_matches(['=', ':'])
                .trim()
                .trim_start_matches("export ")
                .to_string();
            if let Some((_, keys)) = groups.last_mut() {
                keys.push(key);
            }
        }
    }
    groups
        .into_iter()
        .filter(|(section, keys)| section.is_some() || !keys.is_empty())
        .map(|(section, keys)| match section {
            Some(s) if keys.is_empty() => s,
            Some(s) => format!("{} {}", s, keys.join(", ")),
            None => keys.join(", "),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
