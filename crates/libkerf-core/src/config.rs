use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::KerfError;

/// Name of the reserved state directory under a project root
pub const STATE_DIR_NAME: &str = ".kerf";

/// Engine configuration stored in `<root>/.kerf/config.toml`.
///
/// Every field has a default, so a partial file loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KerfConfig {
    pub index: IndexConfig,
    pub tokens: TokenConfig,
    pub relevance: RelevanceConfig,
    pub compression: CompressionConfig,
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub budget: BudgetConfig,
    pub workers: WorkerConfig,
}

/// Ignore rules and limits for the code index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Glob patterns (relative paths) excluded from indexing
    pub ignore_patterns: Vec<String>,
    /// Directory names skipped anywhere in the tree
    pub ignored_dirs: Vec<String>,
    /// Hidden entries that are indexed anyway
    pub allowed_hidden: Vec<String>,
    /// Files larger than this are skipped
    pub max_file_bytes: u64,
    /// Cap on distinct search terms stored per file
    pub max_terms_per_file: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: vec!["*.min.js".to_string(), "*.lock".to_string(), "*.map".to_string()],
            ignored_dirs: [
                "target",
                "node_modules",
                "__pycache__",
                "dist",
                "build",
                "venv",
                ".venv",
                ".git",
                ".tox",
                ".mypy_cache",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_hidden: vec![".workflow".to_string()],
            max_file_bytes: 1024 * 1024,
            max_terms_per_file: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Characters per token for the deterministic estimate
    pub chars_per_token: f64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { chars_per_token: 4.0 }
    }
}

/// Weights of the relevance signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub direct_weight: f64,
    pub dependency_weight: f64,
    pub historical_weight: f64,
    pub semantic_weight: f64,
    pub phase_weight: f64,
    /// Candidates scoring below this are not included in a bundle
    pub min_score: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            direct_weight: 0.40,
            dependency_weight: 0.25,
            historical_weight: 0.20,
            semantic_weight: 0.10,
            phase_weight: 0.05,
            min_score: 0.01,
        }
    }
}

impl RelevanceConfig {
    pub fn total_weight(&self) -> f64 {
        self.direct_weight
            + self.dependency_weight
            + self.historical_weight
            + self.semantic_weight
            + self.phase_weight
    }
}

/// Relevance thresholds that pick the compression level a file starts at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Relevance at or above this starts at NONE
    pub none_threshold: f64,
    /// ... at LOW
    pub low_threshold: f64,
    /// ... at MODERATE; anything below starts at HIGH
    pub moderate_threshold: f64,
    /// Lines kept by the hard truncation at EXTREME
    pub extreme_max_lines: usize,
    /// Nesting depth of derived schemas for structured data
    pub schema_max_depth: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            none_threshold: 0.6,
            low_threshold: 0.4,
            moderate_threshold: 0.2,
            extreme_max_lines: 40,
            schema_max_depth: 4,
        }
    }
}

/// Context cache capacity and eviction tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Total token footprint across cached bundles
    pub max_tokens: usize,
    /// Entries older than this are treated as misses; 0 disables expiry
    pub ttl_secs: u64,
    pub recency_weight: f64,
    pub frequency_weight: f64,
    pub prediction_weight: f64,
    pub warm_interval_ms: u64,
    pub predict_interval_ms: u64,
    /// Predicted requests computed per warming cycle
    pub warm_limit: usize,
    /// Distinct task keys (and agents) the pattern model remembers
    pub model_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 128,
            max_tokens: 4_000_000,
            ttl_secs: 3600,
            recency_weight: 0.5,
            frequency_weight: 0.3,
            prediction_weight: 0.2,
            warm_interval_ms: 30_000,
            predict_interval_ms: 10_000,
            warm_limit: 2,
            model_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Lifetime of the in-memory view before it is reloaded from disk
    pub cache_ttl_secs: u64,
    /// Records kept per agent by retention; 0 keeps everything
    pub keep_last: usize,
    /// Most recent records consulted for historical relevance
    pub affinity_window: usize,
    /// Include a history entry in bundles
    pub include_history: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            keep_last: 1000,
            affinity_window: 50,
            include_history: true,
        }
    }
}

/// Component shares as fractions of the total budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetProfile {
    pub specification: f64,
    pub implementation: f64,
    pub tests: f64,
    pub configuration: f64,
    pub history: f64,
}

impl BudgetProfile {
    pub fn total(&self) -> f64 {
        self.specification + self.implementation + self.tests + self.configuration + self.history
    }
}

/// Per-role overrides, keyed by role name (`designer`, `developer`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub profiles: BTreeMap<String, BudgetProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub reindex_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reindex_interval_ms: 60_000,
        }
    }
}

/// `<root>/.kerf`
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME)
}

/// Sled database path for the code index
pub fn index_path(root: &Path) -> PathBuf {
    state_dir(root).join("index")
}

/// Directory of the agent memory store
pub fn memory_dir(root: &Path) -> PathBuf {
    state_dir(root).join("memory")
}

/// Load config from <state_dir>/config.toml
pub fn load_config(state_dir: &Path) -> Result<Option<KerfConfig>, KerfError> {
    let config_path = state_dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&config_path)?;
    let config: KerfConfig = toml::from_str(&content)?;
    Ok(Some(config))
}

/// Save config to <state_dir>/config.toml
pub fn save_config(state_dir: &Path, config: &KerfConfig) -> Result<(), KerfError> {
    std::fs::create_dir_all(state_dir)?;
    let config_path = state_dir.join("config.toml");
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&config_path, content)?;
    Ok(())
}
