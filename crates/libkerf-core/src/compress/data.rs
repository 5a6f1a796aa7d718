use serde_json::Value;

use super::text::{cut, drop_blank_lines, TextStrategy};
use super::CompressionStrategy;
use crate::config::CompressionConfig;
use crate::error::KerfError;
use crate::extractor::data_keys::parse_data;
use crate::types::collection::CompressionLevel;

const SAMPLE_CHARS: usize = 24;

/// JSON, YAML and TOML documents: compact form, then a derived schema
pub struct DataStrategy;

impl CompressionStrategy for DataStrategy {
    fn name(&self) -> &'static str {
        "data"
    }

    fn render(
        &self,
        content: &str,
        language: &str,
        level: CompressionLevel,
        config: &CompressionConfig,
    ) -> Result<String, KerfError> {
        if !matches!(language, "json" | "yaml" | "toml") {
            return TextStrategy.render(content, language, level, config);
        }
        if level == CompressionLevel::None {
            return Ok(content.to_string());
        }

        let value = parse_data(content, language)
            .map_err(|e| KerfError::Compression(format!("cannot parse {} document: {}", language, e)))?;
        let depth = config.schema_max_depth.max(1);
        Ok(match level {
            CompressionLevel::None => content.to_string(),
            CompressionLevel::Low => compact(content, language, &value)?,
            CompressionLevel::Moderate => schema(&value, depth, true),
            CompressionLevel::High => schema(&value, depth.min(2), false),
            CompressionLevel::Extreme => top_level_keys(&value),
        })
    }
}

/// Minified JSON; YAML and TOML lose comments and blank lines
fn compact(content: &str, language: &str, value: &Value) -> Result<String, KerfError> {
    if language == "json" {
        return Ok(serde_json::to_string(value)?);
    }
    let without_comments: String = content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(drop_blank_lines(&without_comments))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn sample(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(cut(&format!("{:?}", s), SAMPLE_CHARS)),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

/// Indented `key: type` lines down to `max_depth` levels of nesting
fn schema(value: &Value, max_depth: usize, samples: bool) -> String {
    let mut out = Vec::new();
    match value {
        Value::Array(items) => {
            out.push(format!("[{} items]", items.len()));
            if let Some(first) = items.first() {
                describe(first, 1, max_depth, samples, &mut out);
            }
        }
        other => describe(other, 0, max_depth, samples, &mut out),
    }
    out.join("\n")
}

fn describe(value: &Value, depth: usize, max_depth: usize, samples: bool, out: &mut Vec<String>) {
    if depth >= max_depth {
        return;
    }
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let mut line = format!("{}{}: {}", indent, key, type_name(child));
                if let Value::Array(items) = child {
                    line.push_str(&format!("[{}]", items.len()));
                }
                if samples {
                    if let Some(s) = sample(child) {
                        line.push_str(" = ");
                        line.push_str(&s);
                    }
                }
                out.push(line);
                match child {
                    Value::Object(_) => describe(child, depth + 1, max_depth, samples, out),
                    Value::Array(items) => {
                        if let Some(first @ Value::Object(_)) = items.first() {
                            describe(first, depth + 1, max_depth, samples, out);
                        }
                    }
                    _ => {}
                }
            }
        }
        scalar => {
            let mut line = format!("{}{}", indent, type_name(scalar));
            if samples {
                if let Some(s) = sample(scalar) {
                    line.push_str(" = ");
                    line.push_str(&s);
                }
            }
            out.push(line);
        }
    }
}

fn top_level_keys(value: &Value) -> String {
    match value {
        Value::Object(map) => map.keys().cloned().collect::<Vec<_>>().join(", "),
        Value::Array(items) => match items.first() {
            Some(Value::Object(map)) => format!(
                "[{} items] {}",
                items.len(),
                map.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
            _ => format!("[{} items]", items.len()),
        },
        scalar => type_name(scalar).to_string(),
    }
}
