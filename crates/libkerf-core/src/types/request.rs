use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::KerfError;

/// Agent role, parsed leniently from free-form names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Designer,
    Developer,
    Tester,
    Reviewer,
    Generic,
}

impl AgentRole {
    /// Map a role name to a known role; unknown names become `Generic`
    pub fn from_name(name: &str) -> Self {
        match normalize(name).as_str() {
            "designer" | "design" | "architect" | "planner" | "product_owner" => AgentRole::Designer,
            "developer" | "dev" | "coder" | "engineer" | "implementer" | "programmer" => {
                AgentRole::Developer
            }
            "tester" | "test" | "qa" | "test_writer" | "quality" => AgentRole::Tester,
            "reviewer" | "review" | "code_reviewer" | "auditor" => AgentRole::Reviewer,
            _ => AgentRole::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Designer => "designer",
            AgentRole::Developer => "developer",
            AgentRole::Tester => "tester",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Generic => "generic",
        }
    }
}

/// Workflow phase the requesting agent is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    Planning,
    Design,
    Implementation,
    Testing,
    Review,
    Generic,
}

impl WorkflowPhase {
    pub fn from_name(name: &str) -> Self {
        match normalize(name).as_str() {
            "planning" | "plan" | "sprint_planning" | "backlog" => WorkflowPhase::Planning,
            "design" | "architecture" | "designing" => WorkflowPhase::Design,
            "implementation" | "implement" | "development" | "coding" | "build" => {
                WorkflowPhase::Implementation
            }
            "testing" | "test" | "test_writing" | "qa" | "verification" => WorkflowPhase::Testing,
            "review" | "code_review" | "reviewing" => WorkflowPhase::Review,
            _ => WorkflowPhase::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Planning => "planning",
            WorkflowPhase::Design => "design",
            WorkflowPhase::Implementation => "implementation",
            WorkflowPhase::Testing => "testing",
            WorkflowPhase::Review => "review",
            WorkflowPhase::Generic => "generic",
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

/// A request for a prepared context bundle. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
    pub task_description: String,
    pub agent_role: String,
    pub phase: String,
    /// Total token budget; must be positive
    pub token_budget: i64,
    pub project_root: PathBuf,
    /// Checkout-style coordination: lease returned files to this agent
    #[serde(default)]
    pub exclusive: bool,
    /// Memory key; defaults to the role name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl ContextRequest {
    pub fn new(
        task_description: impl Into<String>,
        agent_role: impl Into<String>,
        phase: impl Into<String>,
        token_budget: i64,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_description: task_description.into(),
            agent_role: agent_role.into(),
            phase: phase.into(),
            token_budget,
            project_root: project_root.into(),
            exclusive: false,
            agent_id: None,
        }
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn role(&self) -> AgentRole {
        AgentRole::from_name(&self.agent_role)
    }

    pub fn workflow_phase(&self) -> WorkflowPhase {
        WorkflowPhase::from_name(&self.phase)
    }

    pub fn agent_id(&self) -> String {
        match &self.agent_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => normalize(&self.agent_role),
        }
    }

    /// Budget as an unsigned count. Only meaningful after `validate`.
    pub fn budget(&self) -> usize {
        self.token_budget.max(0) as usize
    }

    /// Reject malformed requests before any work is done
    pub fn validate(&self) -> Result<(), KerfError> {
        if self.token_budget <= 0 {
            return Err(KerfError::Validation(format!(
                "token budget must be positive, got {}",
                self.token_budget
            )));
        }
        if self.task_description.trim().is_empty() {
            return Err(KerfError::Validation("task description is empty".to_string()));
        }
        if self.agent_role.trim().is_empty() {
            return Err(KerfError::Validation("agent role is empty".to_string()));
        }
        if !self.project_root.is_dir() {
            return Err(KerfError::Validation(format!(
                "project root is not a directory: {}",
                self.project_root.display()
            )));
        }
        Ok(())
    }
}

/// Request fingerprint (BLAKE2b-256), the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, KerfError> {
        let bytes = hex::decode(s)
            .map_err(|e| KerfError::Validation(format!("invalid fingerprint '{}': {}", s, e)))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KerfError::Validation(format!("fingerprint '{}' is not 32 bytes", s)))?;
        Ok(Fingerprint(arr))
    }

    /// First 16 hex chars, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_role_aliases() {
        assert_eq!(AgentRole::from_name("Developer"), AgentRole::Developer);
        assert_eq!(AgentRole::from_name("  qa "), AgentRole::Tester);
        assert_eq!(AgentRole::from_name("code-reviewer"), AgentRole::Reviewer);
        assert_eq!(AgentRole::from_name("architect"), AgentRole::Designer);
        assert_eq!(AgentRole::from_name("scrum master"), AgentRole::Generic);
    }

    #[test]
    fn test_phase_aliases() {
        assert_eq!(WorkflowPhase::from_name("test-writing"), WorkflowPhase::Testing);
        assert_eq!(WorkflowPhase::from_name("Implementation"), WorkflowPhase::Implementation);
        assert_eq!(WorkflowPhase::from_name("sprint planning"), WorkflowPhase::Planning);
        assert_eq!(WorkflowPhase::from_name("deploy"), WorkflowPhase::Generic);
    }

    #[test]
    fn test_validate_rejects_non_positive_budget() {
        let dir = tempdir().unwrap();
        let req = ContextRequest::new("fix login bug", "developer", "implementation", 0, dir.path());
        let err = req.validate().unwrap_err();
        assert!(err.is_hard());

        let req = ContextRequest::new("fix login bug", "developer", "implementation", -5, dir.path());
        assert!(req.validate().is_err());

        let req = ContextRequest::new("fix login bug", "developer", "implementation", 10, dir.path());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let req = ContextRequest::new("x", "developer", "testing", 100, dir.path().join("nope"));
        assert!(matches!(req.validate(), Err(KerfError::Validation(_))));
    }

    #[test]
    fn test_agent_id_defaults_to_role() {
        let req = ContextRequest::new("x", "Code Reviewer", "review", 100, "/tmp");
        assert_eq!(req.agent_id(), "code_reviewer");
        let req = req.with_agent_id("rev-1");
        assert_eq!(req.agent_id(), "rev-1");
    }

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fp = Fingerprint([7u8; 32]);
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert_eq!(fp.short().len(), 16);
        assert!(Fingerprint::from_hex("abcd").is_err());
    }
}
