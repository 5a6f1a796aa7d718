use serde::{Deserialize, Serialize};

/// One entry in an agent's memory; records are only ever added or pruned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub record_id: String,
    pub agent_id: String,
    /// Hex task key of the request that produced this record
    pub task_fingerprint: String,
    /// Short description of the task, used for similarity lookups
    #[serde(default)]
    pub task_summary: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
    /// Follow-ups from earlier records that this one closes
    #[serde(default)]
    pub resolved_follow_ups: Vec<String>,
    #[serde(default)]
    pub linked_files: Vec<String>,
    pub recorded_at_ms: u64,
}

impl MemoryRecord {
    pub fn new(agent_id: impl Into<String>, task_fingerprint: impl Into<String>) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            task_fingerprint: task_fingerprint.into(),
            task_summary: String::new(),
            phase: String::new(),
            decisions: Vec::new(),
            learnings: Vec::new(),
            follow_ups: Vec::new(),
            resolved_follow_ups: Vec::new(),
            linked_files: Vec::new(),
            recorded_at_ms: super::now_ms(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.task_summary = summary.into();
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn with_linked_files(mut self, files: Vec<String>) -> Self {
        self.linked_files = files;
        self
    }

    pub fn decision(mut self, text: impl Into<String>) -> Self {
        self.decisions.push(text.into());
        self
    }

    pub fn learning(mut self, text: impl Into<String>) -> Self {
        self.learnings.push(text.into());
        self
    }

    pub fn follow_up(mut self, text: impl Into<String>) -> Self {
        self.follow_ups.push(text.into());
        self
    }

    pub fn resolves(mut self, text: impl Into<String>) -> Self {
        self.resolved_follow_ups.push(text.into());
        self
    }
}
