use serde_json::Value;

use super::{Extraction, StructureExtractor};
use crate::error::KerfError;
use crate::types::file::{ContentType, SymbolInfo};

/// Top-level key extractor for JSON, YAML and TOML documents
pub struct DataKeyExtractor;

impl StructureExtractor for DataKeyExtractor {
    fn name(&self) -> &'static str {
        "data-keys"
    }

    fn supports(&self, content_type: ContentType, language: &str) -> bool {
        matches!(content_type, ContentType::StructuredData | ContentType::Config)
            && matches!(language, "json" | "yaml" | "toml")
    }

    fn extract(&self, content: &str, language: &str) -> Result<Extraction, KerfError> {
        let value = parse_data(content, language)?;
        let symbols = top_level_keys(&value)
            .into_iter()
            .map(|key| {
                let line = key_line(content, &key);
                SymbolInfo::new(key, "key", line, line)
            })
            .collect();
        Ok(Extraction {
            symbols,
            imports: Vec::new(),
            parse_failed: false,
        })
    }
}

/// Parse a data document into a JSON value.
///
/// JSON-lines files (one document per line) become an array.
pub fn parse_data(content: &str, language: &str) -> Result<Value, KerfError> {
    match language {
        "json" => match serde_json::from_str(content) {
            Ok(value) => Ok(value),
            Err(e) => {
                let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
                if lines.len() < 2 {
                    return Err(e.into());
                }
                let docs = lines
                    .iter()
                    .map(|l| serde_json::from_str::<Value>(l))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| KerfError::from(e))?;
                Ok(Value::Array(docs))
            }
        },
        "yaml" => Ok(serde_yaml::from_str(content)?),
        "toml" => Ok(toml::from_str(content)?),
        other => Err(KerfError::Internal(format!("'{}' is not a data format", other))),
    }
}

fn top_level_keys(value: &Value) -> Vec<String> {
    let mut keys: Vec<String> = match value {
        Value::Object(map) => map.keys().cloned().collect(),
        // Arrays of records: keys of the first record
        Value::Array(items) => match items.first() {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    keys.sort();
    keys
}

/// First line mentioning the key, preferring unindented lines
fn key_line(content: &str, key: &str) -> u32 {
    let quoted = format!("\"{}\"", key);
    let mut fallback = None;
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        let hit = trimmed.starts_with(&quoted)
            || trimmed.starts_with(&format!("{}:", key))
            || trimmed.starts_with(&format!("{} ", key))
            || trimmed.starts_with(&format!("{}=", key))
            || trimmed.starts_with(&format!("[{}", key));
        if hit {
            if trimmed.len() == line.len() || line.starts_with("  \"") {
                return idx as u32 + 1;
            }
            fallback.get_or_insert(idx as u32 + 1);
        }
    }
    fallback.unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(out: &Extraction) -> Vec<&str> {
        out.symbols.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_json_keys() {
        let content = "{\n  \"name\": \"app\",\n  \"dependencies\": {\"x\": \"1\"}\n}\n";
        let out = DataKeyExtractor.extract(content, "json").unwrap();
        assert_eq!(keys(&out), vec!["dependencies", "name"]);
        let name = out.symbols.iter().find(|s| s.name == "name").unwrap();
        assert_eq!(name.line_start, 2);
    }

    #[test]
    fn test_yaml_keys() {
        let content = "version: 2\nservices:\n  web:\n    image: nginx\n";
        let out = DataKeyExtractor.extract(content, "yaml").unwrap();
        assert_eq!(keys(&out), vec!["services", "version"]);
    }

    #[test]
    fn test_toml_keys() {
        let content = "[package]\nname = \"kerf\"\n\n[dependencies]\nserde = \"1\"\n";
        let out = DataKeyExtractor.extract(content, "toml").unwrap();
        assert_eq!(keys(&out), vec!["dependencies", "package"]);
        let deps = out.symbols.iter().find(|s| s.name == "dependencies").unwrap();
        assert_eq!(deps.line_start, 4);
    }

    #[test]
    fn test_json_lines() {
        let content = "{\"id\": 1, \"msg\": \"a\"}\n{\"id\": 2, \"msg\": \"b\"}\n";
        let value = parse_data(content, "json").unwrap();
        assert_eq!(value.as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(DataKeyExtractor.extract("{\"a\": ", "json").is_err());
        assert!(DataKeyExtractor.extract("key: [unclosed", "yaml").is_err());
    }
}
