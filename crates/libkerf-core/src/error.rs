use thiserror::Error;

/// Main error type for kerf operations
#[derive(Debug, Error)]
pub enum KerfError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("index unavailable: {0}")]
    Index(String),

    #[error("cache unavailable: {0}")]
    Cache(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KerfError {
    /// Stable error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            KerfError::Validation(_) => "validation_error",
            KerfError::NotFound(_) => "not_found",
            KerfError::BudgetExceeded(_) => "budget_exceeded",
            KerfError::Compression(_) => "compression_error",
            KerfError::Index(_) => "index_error",
            KerfError::Cache(_) => "cache_error",
            KerfError::Timeout(_) => "timeout",
            KerfError::Io(_) => "io_error",
            KerfError::Sled(_) => "index_error",
            KerfError::Json(_) => "internal_error",
            KerfError::Yaml(_) => "internal_error",
            KerfError::TomlParse(_) => "config_error",
            KerfError::TomlSerialize(_) => "internal_error",
            KerfError::Internal(_) => "internal_error",
        }
    }

    /// Exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            KerfError::Validation(_) => 2,
            KerfError::NotFound(_) => 3,
            KerfError::Index(_) | KerfError::Sled(_) => 4,
            KerfError::Io(_) => 5,
            KerfError::TomlParse(_) => 2,
            _ => 1,
        }
    }

    /// Whether this error is surfaced to callers of the collect pipeline.
    ///
    /// Everything else is absorbed: the pipeline degrades (partial, uncached,
    /// uncompressed-fallback) instead of failing.
    pub fn is_hard(&self) -> bool {
        matches!(self, KerfError::Validation(_))
    }

    /// Shorthand for a missing indexed path
    pub fn file_not_found(path: &str) -> Self {
        KerfError::NotFound(format!("'{}' is not indexed", path))
    }
}
