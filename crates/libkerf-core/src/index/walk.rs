use std::path::Path;
use std::time::UNIX_EPOCH;

use glob::Pattern;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{IndexConfig, STATE_DIR_NAME};

/// A file that passed the ignore rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Root-relative, `/`-separated
    pub rel_path: String,
    pub size: u64,
    pub mtime_ms: u64,
}

/// Ignore rules applied during a walk
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
    ignored_dirs: Vec<String>,
    allowed_hidden: Vec<String>,
    max_file_bytes: u64,
}

impl IgnoreRules {
    pub fn from_config(config: &IndexConfig) -> Self {
        let patterns = config
            .ignore_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring invalid ignore pattern");
                    None
                }
            })
            .collect();
        Self {
            patterns,
            ignored_dirs: config.ignored_dirs.clone(),
            allowed_hidden: config.allowed_hidden.clone(),
            max_file_bytes: config.max_file_bytes,
        }
    }

    /// Whether a directory or file name is skipped outright
    pub fn skips_name(&self, name: &str, is_dir: bool) -> bool {
        if name == STATE_DIR_NAME {
            return true;
        }
        if is_dir && self.ignored_dirs.iter().any(|d| d == name) {
            return true;
        }
        name.starts_with('.') && !self.allowed_hidden.iter().any(|h| h == name)
    }

    /// Whether a root-relative path matches an ignore glob
    pub fn skips_path(&self, rel_path: &str) -> bool {
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        self.patterns
            .iter()
            .any(|p| p.matches(rel_path) || p.matches(file_name))
    }

    /// Whether a root-relative path is indexable at all, checking every segment
    pub fn admits(&self, rel_path: &str) -> bool {
        let segments: Vec<&str> = rel_path.split('/').collect();
        let last = segments.len().saturating_sub(1);
        for (idx, seg) in segments.iter().enumerate() {
            if self.skips_name(seg, idx != last) {
                return false;
            }
        }
        !self.skips_path(rel_path)
    }

    pub fn too_large(&self, size: u64) -> bool {
        size > self.max_file_bytes
    }
}

/// Convert an absolute path under `root` into a root-relative `/` path
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_str().map(|s| s.to_string()))
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

pub fn mtime_ms(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Walk `root` applying the ignore rules. Results are sorted by path.
pub fn walk(root: &Path, rules: &IgnoreRules) -> Vec<WalkedFile> {
    let mut files = Vec::new();

    let keep = |entry: &DirEntry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !rules.skips_name(&name, entry.file_type().is_dir())
    };

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(keep)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel_path) = relative_path(root, entry.path()) else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 path");
            continue;
        };
        if rules.skips_path(&rel_path) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if rules.too_large(meta.len()) {
            debug!(path = %rel_path, size = meta.len(), "skipping oversized file");
            continue;
        }
        files.push(WalkedFile {
            rel_path,
            size: meta.len(),
            mtime_ms: mtime_ms(&meta),
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn paths(files: &[WalkedFile]) -> Vec<&str> {
        files.iter().map(|f| f.rel_path.as_str()).collect()
    }

    #[test]
    fn test_walk_applies_ignore_rules() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join(".kerf")).unwrap();
        fs::create_dir_all(root.join(".workflow")).unwrap();
        fs::write(root.join("src/auth.py"), "def login(): pass\n").unwrap();
        fs::write(root.join("src/app.min.js"), "x").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::write(root.join(".kerf/config.toml"), "").unwrap();
        fs::write(root.join(".workflow/state.json"), "{}").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::write(root.join("big.txt"), "x".repeat(2048)).unwrap();

        let mut config = IndexConfig::default();
        config.max_file_bytes = 1024;
        let rules = IgnoreRules::from_config(&config);
        let files = walk(root, &rules);

        assert_eq!(paths(&files), vec![".workflow/state.json", "src/auth.py"]);
    }

    #[test]
    fn test_admits_checks_segments() {
        let rules = IgnoreRules::from_config(&IndexConfig::default());
        assert!(rules.admits("src/auth.py"));
        assert!(!rules.admits("target/debug/build.rs"));
        assert!(!rules.admits(".kerf/index/db"));
        assert!(!rules.admits("web/vendor.min.js"));
        assert!(rules.admits(".workflow/state.json"));
    }
}
