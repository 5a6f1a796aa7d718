// Key construction helpers for the index trees.
//
// Paths never contain NUL, so it separates key segments.

use crate::types::file::EdgeKind;

const SEP: u8 = 0;

pub fn file_key(path: &str) -> Vec<u8> {
    path.as_bytes().to_vec()
}

pub fn dep_prefix(path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 1);
    key.extend_from_slice(path.as_bytes());
    key.push(SEP);
    key
}

/// `source \0 target \0 kind` in the forward tree,
/// `target \0 source \0 kind` in the reverse tree
pub fn dep_key(first: &str, second: &str, kind: EdgeKind) -> Vec<u8> {
    let mut key = dep_prefix(first);
    key.extend_from_slice(second.as_bytes());
    key.push(SEP);
    key.push(kind.to_byte());
    key
}

/// Parse the suffix of a dep key after its prefix into (other path, kind)
pub fn parse_dep_key_suffix(key: &[u8], prefix_len: usize) -> Option<(String, EdgeKind)> {
    if key.len() < prefix_len + 2 {
        return None;
    }
    let suffix = &key[prefix_len..];
    let (path, tail) = suffix.split_at(suffix.len() - 2);
    if tail[0] != SEP {
        return None;
    }
    let kind = EdgeKind::from_byte(tail[1])?;
    let path = std::str::from_utf8(path).ok()?;
    Some((path.to_string(), kind))
}

pub fn term_prefix(term: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 1);
    key.extend_from_slice(term.as_bytes());
    key.push(SEP);
    key
}

pub fn term_key(term: &str, path: &str) -> Vec<u8> {
    let mut key = term_prefix(term);
    key.extend_from_slice(path.as_bytes());
    key
}

/// Symbols are keyed by lowercase name so lookups are case-insensitive
pub fn symbol_prefix(name: &str) -> Vec<u8> {
    term_prefix(&name.to_lowercase())
}

pub fn symbol_key(name: &str, path: &str, line: u32) -> Vec<u8> {
    let mut key = symbol_prefix(name);
    key.extend_from_slice(path.as_bytes());
    key.push(SEP);
    key.extend_from_slice(&line.to_be_bytes());
    key
}

/// Path segment of a symbol key
pub fn parse_symbol_key_path(key: &[u8]) -> Option<String> {
    let first = key.iter().position(|b| *b == SEP)?;
    let rest = &key[first + 1..];
    if rest.len() < 5 {
        return None;
    }
    let path = &rest[..rest.len() - 5];
    std::str::from_utf8(path).ok().map(|s| s.to_string())
}

/// Path segment of a term key
pub fn parse_term_key_path(key: &[u8], prefix_len: usize) -> Option<String> {
    std::str::from_utf8(key.get(prefix_len..)?).ok().map(|s| s.to_string())
}

pub fn u64_value(bytes: &[u8]) -> u64 {
    let arr: [u8; 8] = bytes.try_into().unwrap_or([0; 8]);
    u64::from_le_bytes(arr)
}

pub fn u32_value(bytes: &[u8]) -> u32 {
    let arr: [u8; 4] = bytes.try_into().unwrap_or([0; 4]);
    u32::from_le_bytes(arr)
}

pub fn f32_value(bytes: &[u8]) -> f32 {
    let arr: [u8; 4] = bytes.try_into().unwrap_or([0; 4]);
    f32::from_le_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dep_key_round_trip() {
        let key = dep_key("src/auth.py", "src/db.py", EdgeKind::Imports);
        let prefix = dep_prefix("src/auth.py");
        assert!(key.starts_with(&prefix));
        assert_eq!(
            parse_dep_key_suffix(&key, prefix.len()),
            Some(("src/db.py".to_string(), EdgeKind::Imports))
        );
    }

    #[test]
    fn test_dep_prefix_does_not_match_longer_path() {
        let key = dep_key("src/auth.py.bak", "x", EdgeKind::Imports);
        assert!(!key.starts_with(&dep_prefix("src/auth.py")));
    }

    #[test]
    fn test_symbol_key_path() {
        let key = symbol_key("Login", "src/auth.py", 12);
        assert!(key.starts_with(&symbol_prefix("login")));
        assert_eq!(parse_symbol_key_path(&key), Some("src/auth.py".to_string()));
    }
}
