//! Token estimation and per-component budgets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{BudgetConfig, BudgetProfile, TokenConfig};
use crate::error::KerfError;
use crate::types::collection::ContextCollection;
use crate::types::file::ContentType;
use crate::types::request::{AgentRole, WorkflowPhase};

/// Characters per token used when no configuration is given
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

// Absorbs float noise in share sums (0.15 + 0.5 + ... != 1.0 exactly)
const SHARE_EPSILON: f64 = 1e-9;

/// Budget component a bundle entry is charged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Specification,
    Implementation,
    Tests,
    Configuration,
    History,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Specification,
        Component::Implementation,
        Component::Tests,
        Component::Configuration,
        Component::History,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Specification => "specification",
            Component::Implementation => "implementation",
            Component::Tests => "tests",
            Component::Configuration => "configuration",
            Component::History => "history",
        }
    }

    pub fn for_content_type(content_type: ContentType) -> Component {
        match content_type {
            ContentType::Markdown => Component::Specification,
            ContentType::StructuredSource | ContentType::Other => Component::Implementation,
            ContentType::TestSource => Component::Tests,
            ContentType::StructuredData | ContentType::Config => Component::Configuration,
        }
    }

    fn share(&self, profile: &BudgetProfile) -> f64 {
        match self {
            Component::Specification => profile.specification,
            Component::Implementation => profile.implementation,
            Component::Tests => profile.tests,
            Component::Configuration => profile.configuration,
            Component::History => profile.history,
        }
    }
}

/// Estimate tokens at the default ratio
pub fn estimate_tokens(text: &str) -> usize {
    TokenEstimator::default().estimate(text)
}

/// Deterministic character-ratio token estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl TokenEstimator {
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn from_config(config: &TokenConfig) -> Self {
        Self::new(config.chars_per_token)
    }

    /// `ceil(chars / ratio)`; empty text is 0 tokens
    pub fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as usize
    }

    /// Largest character count that stays within `tokens`
    pub fn chars_for(&self, tokens: usize) -> usize {
        (tokens as f64 * self.chars_per_token).floor() as usize
    }
}

/// Built-in share profile for a role
pub fn role_profile(role: AgentRole) -> BudgetProfile {
    let (specification, implementation, tests, configuration, history) = match role {
        AgentRole::Designer => (0.45, 0.20, 0.05, 0.10, 0.20),
        AgentRole::Developer => (0.15, 0.50, 0.15, 0.10, 0.10),
        AgentRole::Tester => (0.10, 0.30, 0.40, 0.10, 0.10),
        AgentRole::Reviewer => (0.15, 0.40, 0.20, 0.10, 0.15),
        AgentRole::Generic => (0.20, 0.35, 0.20, 0.10, 0.15),
    };
    BudgetProfile {
        specification,
        implementation,
        tests,
        configuration,
        history,
    }
}

/// Shift shares toward what the phase works on
fn apply_phase(mut profile: BudgetProfile, phase: WorkflowPhase) -> BudgetProfile {
    fn shift(from: &mut f64, to: &mut f64, amount: f64) {
        let moved = amount.min(*from);
        *from -= moved;
        *to += moved;
    }

    match phase {
        WorkflowPhase::Planning | WorkflowPhase::Design => {
            shift(&mut profile.implementation, &mut profile.specification, 0.10)
        }
        WorkflowPhase::Implementation => {
            shift(&mut profile.specification, &mut profile.implementation, 0.05)
        }
        WorkflowPhase::Testing => shift(&mut profile.implementation, &mut profile.tests, 0.10),
        WorkflowPhase::Review => shift(&mut profile.specification, &mut profile.history, 0.05),
        WorkflowPhase::Generic => {}
    }
    profile
}

/// Per-component allocation of a total budget.
///
/// Allocations never sum past `total`. A component that finishes under its
/// share hands the rest to a shared pool, which the next component in
/// priority order may draw on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub total: usize,
    pub allocations: BTreeMap<Component, usize>,
    pub consumed: BTreeMap<Component, usize>,
    /// Shared surplus: rounding remainder plus unused shares
    pub pool: usize,
    /// Components in the order they are filled
    pub priority: Vec<Component>,
    finished: Vec<Component>,
}

impl TokenBudget {
    fn from_profile(total: usize, profile: &BudgetProfile) -> Self {
        let share_total = profile.total();
        let scale = if share_total > 1.0 + SHARE_EPSILON {
            1.0 / share_total
        } else {
            1.0
        };

        let mut allocations = BTreeMap::new();
        let mut allocated = 0usize;
        for component in Component::ALL {
            let share = component.share(profile).max(0.0) * scale;
            let tokens = (total as f64 * share + SHARE_EPSILON).floor() as usize;
            allocated += tokens;
            allocations.insert(component, tokens);
        }

        let mut priority: Vec<Component> = Component::ALL.to_vec();
        priority.sort_by(|a, b| {
            let sa = allocations.get(a).copied().unwrap_or(0);
            let sb = allocations.get(b).copied().unwrap_or(0);
            sb.cmp(&sa).then_with(|| a.cmp(b))
        });

        Self {
            total,
            allocations,
            consumed: BTreeMap::new(),
            pool: total.saturating_sub(allocated),
            priority,
            finished: Vec::new(),
        }
    }

    pub fn allocation(&self, component: Component) -> usize {
        self.allocations.get(&component).copied().unwrap_or(0)
    }

    pub fn consumed_by(&self, component: Component) -> usize {
        self.consumed.get(&component).copied().unwrap_or(0)
    }

    pub fn consumed_total(&self) -> usize {
        self.consumed.values().sum()
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.consumed_total())
    }

    fn own_remaining(&self, component: Component) -> usize {
        if self.finished.contains(&component) {
            return 0;
        }
        self.allocation(component)
            .saturating_sub(self.consumed_by(component))
    }

    /// Tokens a component may still spend: its own share plus the pool
    pub fn available(&self, component: Component) -> usize {
        if self.finished.contains(&component) {
            return 0;
        }
        (self.own_remaining(component) + self.pool).min(self.remaining())
    }

    /// Charge tokens to a component, drawing on the pool past its share
    pub fn consume(&mut self, component: Component, tokens: usize) -> Result<(), KerfError> {
        let available = self.available(component);
        if tokens > available {
            return Err(KerfError::BudgetExceeded(format!(
                "{} needs {} tokens, {} available",
                component.as_str(),
                tokens,
                available
            )));
        }
        let from_own = tokens.min(self.own_remaining(component));
        self.pool -= tokens - from_own;
        *self.consumed.entry(component).or_insert(0) += tokens;
        Ok(())
    }

    /// Close a component and return its unused share to the pool
    pub fn finish(&mut self, component: Component) -> usize {
        if self.finished.contains(&component) {
            return 0;
        }
        let surplus = self.own_remaining(component);
        self.finished.push(component);
        self.pool += surplus;
        surplus
    }

    pub fn is_finished(&self, component: Component) -> bool {
        self.finished.contains(&component)
    }

    /// Sum of allocations plus the initial pool never exceeds the total
    pub fn is_consistent(&self) -> bool {
        let allocated: usize = self.allocations.values().sum();
        allocated <= self.total && self.consumed_total() <= self.total
    }
}

/// Computes budgets from role/phase profiles and estimates token counts
#[derive(Debug, Clone, Default)]
pub struct TokenCalculator {
    estimator: TokenEstimator,
    overrides: BudgetConfig,
}

impl TokenCalculator {
    pub fn new(tokens: &TokenConfig, budget: &BudgetConfig) -> Self {
        Self {
            estimator: TokenEstimator::from_config(tokens),
            overrides: budget.clone(),
        }
    }

    pub fn estimator(&self) -> TokenEstimator {
        self.estimator
    }

    pub fn estimate(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Split `total` across components for this role and phase
    pub fn allocate(&self, total: usize, role: AgentRole, phase: WorkflowPhase) -> TokenBudget {
        let profile = match self.overrides.profiles.get(role.as_str()) {
            Some(custom) => *custom,
            None => apply_phase(role_profile(role), phase),
        };
        TokenBudget::from_profile(total, &profile)
    }

    pub fn fits(&self, collection: &ContextCollection, budget: &TokenBudget) -> bool {
        collection.total_tokens <= budget.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_exact() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_estimator_counts_chars_not_bytes() {
        // 4 chars, 8 bytes
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_custom_ratio() {
        let est = TokenEstimator::new(2.0);
        assert_eq!(est.estimate("abcd"), 2);
        assert_eq!(est.chars_for(10), 20);
        // Nonsense ratios fall back to the default
        assert_eq!(TokenEstimator::new(0.0).estimate("abcd"), 1);
    }

    #[test]
    fn test_allocations_never_exceed_total() {
        let calc = TokenCalculator::default();
        for total in [0usize, 1, 7, 99, 2000, 12345] {
            for role in [
                AgentRole::Designer,
                AgentRole::Developer,
                AgentRole::Tester,
                AgentRole::Reviewer,
                AgentRole::Generic,
            ] {
                let budget = calc.allocate(total, role, WorkflowPhase::Testing);
                let allocated: usize = budget.allocations.values().sum();
                assert!(allocated <= total);
                assert_eq!(allocated + budget.pool, total);
                assert!(budget.is_consistent());
            }
        }
    }

    #[test]
    fn test_role_profiles_shape_allocation() {
        let calc = TokenCalculator::default();
        let designer = calc.allocate(1000, AgentRole::Designer, WorkflowPhase::Generic);
        let developer = calc.allocate(1000, AgentRole::Developer, WorkflowPhase::Generic);
        assert!(
            designer.allocation(Component::Specification) > developer.allocation(Component::Specification)
        );
        assert!(
            developer.allocation(Component::Implementation) > designer.allocation(Component::Implementation)
        );
        assert_eq!(developer.priority[0], Component::Implementation);
        assert_eq!(designer.priority[0], Component::Specification);
    }

    #[test]
    fn test_testing_phase_boosts_tests() {
        let calc = TokenCalculator::default();
        let generic = calc.allocate(1000, AgentRole::Developer, WorkflowPhase::Generic);
        let testing = calc.allocate(1000, AgentRole::Developer, WorkflowPhase::Testing);
        assert!(testing.allocation(Component::Tests) > generic.allocation(Component::Tests));
    }

    #[test]
    fn test_exact_developer_allocation() {
        let calc = TokenCalculator::default();
        let budget = calc.allocate(2000, AgentRole::Developer, WorkflowPhase::Generic);
        assert_eq!(budget.allocation(Component::Specification), 300);
        assert_eq!(budget.allocation(Component::Implementation), 1000);
        assert_eq!(budget.allocation(Component::Tests), 300);
        assert_eq!(budget.allocation(Component::Configuration), 200);
        assert_eq!(budget.allocation(Component::History), 200);
        assert_eq!(budget.pool, 0);
    }

    #[test]
    fn test_surplus_flows_to_next_component() {
        let calc = TokenCalculator::default();
        let mut budget = calc.allocate(2000, AgentRole::Developer, WorkflowPhase::Generic);

        budget.consume(Component::Implementation, 400).unwrap();
        assert_eq!(budget.finish(Component::Implementation), 600);
        assert_eq!(budget.pool, 600);

        // Tests may now use its own 300 plus the 600 surplus
        assert_eq!(budget.available(Component::Tests), 900);
        budget.consume(Component::Tests, 700).unwrap();
        assert_eq!(budget.pool, 200);
        assert_eq!(budget.consumed_total(), 1100);
        assert!(budget.consume(Component::Tests, 201).is_err());
    }

    #[test]
    fn test_finished_component_cannot_consume() {
        let calc = TokenCalculator::default();
        let mut budget = calc.allocate(100, AgentRole::Generic, WorkflowPhase::Generic);
        budget.finish(Component::History);
        assert_eq!(budget.available(Component::History), 0);
        assert_eq!(budget.finish(Component::History), 0);
        let err = budget.consume(Component::History, 1).unwrap_err();
        assert_eq!(err.error_code(), "budget_exceeded");
    }

    #[test]
    fn test_profile_override() {
        let mut overrides = BudgetConfig::default();
        overrides.profiles.insert(
            "tester".to_string(),
            BudgetProfile {
                specification: 0.0,
                implementation: 0.0,
                tests: 2.0,
                configuration: 0.0,
                history: 0.0,
            },
        );
        let calc = TokenCalculator::new(&TokenConfig::default(), &overrides);
        let budget = calc.allocate(500, AgentRole::Tester, WorkflowPhase::Testing);
        // Shares above 1.0 are scaled down
        assert_eq!(budget.allocation(Component::Tests), 500);
        assert_eq!(budget.allocation(Component::Implementation), 0);
    }

    #[test]
    fn test_fits() {
        let calc = TokenCalculator::default();
        let budget = calc.allocate(100, AgentRole::Developer, WorkflowPhase::Generic);
        let mut collection = ContextCollection::new("fp", 100, 0);
        collection.total_tokens = 100;
        assert!(calc.fits(&collection, &budget));
        collection.total_tokens = 101;
        assert!(!calc.fits(&collection, &budget));
    }
}
