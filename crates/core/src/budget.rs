//! Budget and enforcement tracking. Resource ceilings imposed outside the loop.

use serde::{Deserialize, Serialize};

use crate::provider::Usage;

/// Answer from a budget check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BudgetDecision {
    Allowed,
    Blocked { reason: String },
}

impl BudgetDecision {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// A block from any of these checks stops the whole loop.
///
/// Every method defaults to "allowed" so a tracker only implements the
/// ceilings it cares about.
pub trait BudgetTracker: Send + Sync {
    /// Called before every model turn.
    fn check_iteration_budget(&self) -> BudgetDecision {
        BudgetDecision::Allowed
    }

    /// Called before every authorized tool execution.
    fn check_tool_budget(&self, _tool_name: &str, _arguments: &serde_json::Value) -> BudgetDecision {
        BudgetDecision::Allowed
    }

    /// Wall-clock cap, checked alongside the iteration cap.
    fn check_duration_budget(&self) -> BudgetDecision {
        BudgetDecision::Allowed
    }

    /// Token usage reported after every model reply.
    fn record_usage(&self, _usage: &Usage) {}
}

/// The "absent" tracker: everything is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBudget;

impl BudgetTracker for NoBudget {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_budget_allows_everything() {
        let b = NoBudget;
        assert_eq!(b.check_iteration_budget(), BudgetDecision::Allowed);
        assert_eq!(b.check_tool_budget("x", &serde_json::json!({})), BudgetDecision::Allowed);
        assert!(!b.check_duration_budget().is_blocked());
    }
}
