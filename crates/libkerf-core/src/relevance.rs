//! Relevance ranking of indexed files against a task description
//!
//! `RelevanceFilter::rank` is a pure function of the request, an index
//! snapshot and precomputed signals (historical affinity from agent memory,
//! optional semantic scores). It ranks every file; how many make it into a
//! bundle is decided by the budget step.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::RelevanceConfig;
use crate::index::similarity::{query_terms, tokenize};
use crate::index::IndexSnapshot;
use crate::types::file::{ContentType, FileNode};
use crate::types::request::{ContextRequest, WorkflowPhase};

const HOP2_FACTOR: f64 = 0.5;
const SEED_THRESHOLD: f64 = 0.5;

/// Per-signal scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub direct: f64,
    pub dependency: f64,
    pub historical: f64,
    pub semantic: f64,
    pub phase: f64,
}

/// A file with its composite relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub path: String,
    pub content_type: ContentType,
    /// Weighted composite in [0, 1]
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Signals computed outside the ranking itself
#[derive(Debug, Clone, Default)]
pub struct RankingSignals {
    /// Path -> affinity from past tasks, in [0, 1]
    pub historical: BTreeMap<String, f64>,
    /// Path -> semantic similarity from an external scorer. Files missing
    /// from the map fall back to token overlap.
    pub semantic: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceFilter {
    config: RelevanceConfig,
}

impl RelevanceFilter {
    pub fn new(config: RelevanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelevanceConfig {
        &self.config
    }

    /// Rank every file in the snapshot, best first.
    ///
    /// Ties are broken by path so the order is deterministic.
    pub fn rank(
        &self,
        request: &ContextRequest,
        snapshot: &IndexSnapshot,
        signals: &RankingSignals,
    ) -> Vec<RankedCandidate> {
        let description = request.task_description.to_lowercase();
        let terms = query_terms(&request.task_description);
        let phase = request.workflow_phase();

        let direct: BTreeMap<&str, f64> = snapshot
            .files
            .iter()
            .map(|f| (f.path.as_str(), direct_mention(&description, &terms, f)))
            .collect();
        let proximity = dependency_proximity(snapshot, &direct);

        let mut ranked: Vec<RankedCandidate> = snapshot
            .files
            .iter()
            .map(|file| {
                let path = file.path.as_str();
                let breakdown = ScoreBreakdown {
                    direct: direct.get(path).copied().unwrap_or(0.0),
                    dependency: proximity.get(path).copied().unwrap_or(0.0),
                    historical: signals.historical.get(path).copied().unwrap_or(0.0).clamp(0.0, 1.0),
                    semantic: match signals.semantic.get(path) {
                        Some(score) => score.clamp(0.0, 1.0),
                        None => token_overlap(&terms, file),
                    },
                    phase: phase_affinity(phase, file.content_type),
                };
                RankedCandidate {
                    path: file.path.clone(),
                    content_type: file.content_type,
                    score: self.composite(&breakdown),
                    breakdown,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        ranked
    }

    /// Weighted sum normalized by the total weight
    pub fn composite(&self, b: &ScoreBreakdown) -> f64 {
        let c = &self.config;
        let total = c.total_weight();
        if total <= 0.0 {
            return 0.0;
        }
        let sum = c.direct_weight * b.direct
            + c.dependency_weight * b.dependency
            + c.historical_weight * b.historical
            + c.semantic_weight * b.semantic
            + c.phase_weight * b.phase;
        (sum / total).clamp(0.0, 1.0)
    }

    /// Whether a candidate is worth including at all
    pub fn admits(&self, candidate: &RankedCandidate) -> bool {
        candidate.score >= self.config.min_score
    }
}

/// Mention of the file's name, path or symbols in the description
fn direct_mention(description: &str, terms: &BTreeSet<String>, file: &FileNode) -> f64 {
    let file_name = file.path.rsplit('/').next().unwrap_or(&file.path).to_lowercase();
    if description.contains(&file.path.to_lowercase()) || description.contains(&file_name) {
        return 1.0;
    }

    let mut score: f64 = 0.0;
    let stem = file.stem().to_lowercase();
    if stem.len() >= 3 && terms.contains(&stem) {
        score = score.max(0.8);
    }

    for name in file.symbol_names() {
        let lower = name.to_lowercase();
        if lower.len() < 3 {
            continue;
        }
        if terms.contains(&lower) {
            score = score.max(0.9);
            continue;
        }
        let words: BTreeSet<String> = tokenize(name).into_iter().filter(|w| w.len() >= 3).collect();
        if words.len() > 1 {
            let hit = words.iter().filter(|w| terms.contains(*w)).count();
            score = score.max(0.6 * hit as f64 / words.len() as f64);
        }
    }

    if score == 0.0 {
        let path_words: BTreeSet<String> = tokenize(&file.path).into_iter().filter(|w| w.len() >= 3).collect();
        if path_words.iter().any(|w| terms.contains(w)) {
            score = 0.4;
        }
    }
    score
}

/// One- and two-hop distance from directly mentioned files, in either
/// edge direction, weighted by edge strength
fn dependency_proximity(snapshot: &IndexSnapshot, direct: &BTreeMap<&str, f64>) -> BTreeMap<String, f64> {
    let mut neighbors: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    for edge in &snapshot.edges {
        let strength = edge.strength as f64;
        neighbors
            .entry(edge.source.as_str())
            .or_default()
            .push((edge.target.as_str(), strength));
        neighbors
            .entry(edge.target.as_str())
            .or_default()
            .push((edge.source.as_str(), strength));
    }

    let mut out: BTreeMap<String, f64> = BTreeMap::new();
    let mut offer = |path: &str, score: f64| {
        let entry = out.entry(path.to_string()).or_insert(0.0);
        if score > *entry {
            *entry = score;
        }
    };

    for (seed, weight) in direct.iter().filter(|(_, w)| **w >= SEED_THRESHOLD) {
        let Some(first) = neighbors.get(seed) else {
            continue;
        };
        for (hop1, s1) in first {
            if hop1 == seed {
                continue;
            }
            offer(*hop1, (s1 * weight).min(1.0));
            if let Some(second) = neighbors.get(hop1) {
                for (hop2, s2) in second {
                    if hop2 == seed || hop2 == hop1 {
                        continue;
                    }
                    offer(*hop2, (s1 * s2 * weight * HOP2_FACTOR).min(1.0));
                }
            }
        }
    }
    out
}

/// Share of query words found in the file's path, symbols and imports
pub fn token_overlap(terms: &BTreeSet<String>, file: &FileNode) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let mut words: BTreeSet<String> = tokenize(&file.path).into_iter().collect();
    for sym in &file.symbols {
        words.extend(tokenize(&sym.name));
    }
    let hits = terms.iter().filter(|t| words.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

/// How well a content type suits the workflow phase
pub fn phase_affinity(phase: WorkflowPhase, content_type: ContentType) -> f64 {
    use ContentType::*;
    match (phase, content_type) {
        (_, Other) => 0.1,
        (WorkflowPhase::Testing, TestSource) => 1.0,
        (WorkflowPhase::Testing, StructuredSource) => 0.6,
        (WorkflowPhase::Testing, _) => 0.3,
        (WorkflowPhase::Implementation, StructuredSource) => 1.0,
        (WorkflowPhase::Implementation, TestSource) => 0.5,
        (WorkflowPhase::Implementation, _) => 0.3,
        (WorkflowPhase::Planning | WorkflowPhase::Design, Markdown) => 1.0,
        (WorkflowPhase::Planning | WorkflowPhase::Design, StructuredData | Config) => 0.5,
        (WorkflowPhase::Planning | WorkflowPhase::Design, _) => 0.3,
        (WorkflowPhase::Review, StructuredSource | TestSource) => 0.8,
        (WorkflowPhase::Review, _) => 0.4,
        (WorkflowPhase::Generic, StructuredSource | TestSource) => 0.5,
        (WorkflowPhase::Generic, _) => 0.3,
    }
}
