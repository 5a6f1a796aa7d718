//! Semantic scoring seam
//!
//! An external scorer (an embedding service, an LLM call) can rate files
//! against a task. The pipeline never depends on one being present: the
//! local token-overlap scorer is the default, and a failing or slow
//! external scorer degrades to it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use libkerf_core::error::KerfError;
use libkerf_core::index::similarity::query_terms;
use libkerf_core::relevance::token_overlap;
use libkerf_core::types::FileNode;

#[async_trait]
pub trait SemanticScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity in [0, 1] per path. Paths left out fall back to token
    /// overlap.
    async fn score(&self, description: &str, files: &[FileNode]) -> Result<BTreeMap<String, f64>, KerfError>;
}

/// Share of task words found in each file's path and symbol names
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlapScorer;

impl TokenOverlapScorer {
    pub fn score_now(&self, description: &str, files: &[FileNode]) -> BTreeMap<String, f64> {
        let terms = query_terms(description);
        files
            .iter()
            .map(|f| (f.path.clone(), token_overlap(&terms, f)))
            .filter(|(_, s)| *s > 0.0)
            .collect()
    }
}

#[async_trait]
impl SemanticScorer for TokenOverlapScorer {
    fn name(&self) -> &'static str {
        "token-overlap"
    }

    async fn score(&self, description: &str, files: &[FileNode]) -> Result<BTreeMap<String, f64>, KerfError> {
        Ok(self.score_now(description, files))
    }
}
