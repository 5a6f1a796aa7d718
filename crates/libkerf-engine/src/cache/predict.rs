//! Request pattern model used for eviction scores and cache warming
//!
//! Tracks, per agent, which task followed which. The request that last
//! produced each task key is kept so a predicted task can be recomputed.
//! The model holds at most `capacity` task keys and agents; past that the
//! least recently observed one is forgotten along with every edge to it.

use std::collections::{BTreeMap, HashMap};

use libkerf_core::types::{ContextRequest, Fingerprint};

const DEFAULT_CAPACITY: usize = 1024;

/// Follow-up counts from one task key
#[derive(Debug, Default, Clone)]
struct Transitions {
    next: BTreeMap<Fingerprint, u64>,
    total: u64,
}

#[derive(Debug, Clone, Copy)]
struct LastTask {
    key: Fingerprint,
    /// Observation number when the agent was last seen
    at: u64,
}

#[derive(Debug)]
pub struct PatternModel {
    capacity: usize,
    /// Observations per task key
    frequency: HashMap<Fingerprint, u64>,
    /// Observation number of each task key's latest request
    last_seen: HashMap<Fingerprint, u64>,
    transitions: HashMap<Fingerprint, Transitions>,
    last_by_agent: BTreeMap<String, LastTask>,
    /// Most recent request per task key
    requests: HashMap<Fingerprint, ContextRequest>,
    observations: u64,
}

impl Default for PatternModel {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl PatternModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frequency: HashMap::new(),
            last_seen: HashMap::new(),
            transitions: HashMap::new(),
            last_by_agent: BTreeMap::new(),
            requests: HashMap::new(),
            observations: 0,
        }
    }

    /// Record that `agent` asked for `task_key`
    pub fn observe(&mut self, agent: &str, task_key: Fingerprint, request: &ContextRequest) {
        self.observations += 1;
        let now = self.observations;
        *self.frequency.entry(task_key).or_insert(0) += 1;
        self.last_seen.insert(task_key, now);
        let last = LastTask { key: task_key, at: now };
        if let Some(prev) = self.last_by_agent.insert(agent.to_string(), last) {
            if prev.key != task_key {
                let t = self.transitions.entry(prev.key).or_default();
                *t.next.entry(task_key).or_insert(0) += 1;
                t.total += 1;
            }
        }
        self.requests.insert(task_key, request.clone());
        self.enforce_capacity();
    }

    /// Number of task keys currently remembered
    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    fn enforce_capacity(&mut self) {
        while self.frequency.len() > self.capacity {
            let Some(victim) = self
                .last_seen
                .iter()
                .min_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
                .map(|(fp, _)| *fp)
            else {
                break;
            };
            self.forget(&victim);
        }
        while self.last_by_agent.len() > self.capacity {
            let Some(agent) = self
                .last_by_agent
                .iter()
                .min_by_key(|(_, last)| last.at)
                .map(|(agent, _)| agent.clone())
            else {
                break;
            };
            self.last_by_agent.remove(&agent);
        }
    }

    fn forget(&mut self, task_key: &Fingerprint) {
        self.frequency.remove(task_key);
        self.last_seen.remove(task_key);
        self.requests.remove(task_key);
        self.transitions.remove(task_key);
        self.transitions.retain(|_, t| {
            if let Some(count) = t.next.remove(task_key) {
                t.total -= count;
            }
            t.total > 0
        });
        self.last_by_agent.retain(|_, last| last.key != *task_key);
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Likelihood in [0, 1] that `task_key` is requested again soon.
    ///
    /// Blends overall frequency with the chance that it follows the last
    /// task of any agent.
    pub fn probability(&self, task_key: &Fingerprint) -> f64 {
        let max_freq = self.frequency.values().copied().max().unwrap_or(0);
        let freq = if max_freq == 0 {
            0.0
        } else {
            self.frequency.get(task_key).copied().unwrap_or(0) as f64 / max_freq as f64
        };
        let follow = self
            .last_by_agent
            .values()
            .filter_map(|last| self.transitions.get(&last.key))
            .filter(|t| t.total > 0)
            .map(|t| t.next.get(task_key).copied().unwrap_or(0) as f64 / t.total as f64)
            .fold(0.0, f64::max);
        (0.5 * freq + 0.5 * follow).clamp(0.0, 1.0)
    }

    /// Requests most likely to come next, best first
    pub fn predict(&self, limit: usize) -> Vec<ContextRequest> {
        let mut scored: BTreeMap<Fingerprint, f64> = BTreeMap::new();
        for last in self.last_by_agent.values() {
            let Some(t) = self.transitions.get(&last.key) else {
                continue;
            };
            for (next, count) in &t.next {
                let p = *count as f64 / t.total as f64;
                let slot = scored.entry(*next).or_insert(0.0);
                if p > *slot {
                    *slot = p;
                }
            }
        }
        let mut ranked: Vec<(Fingerprint, f64)> = scored.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .filter_map(|(fp, _)| self.requests.get(&fp).cloned())
            .take(limit)
            .collect()
    }
}
