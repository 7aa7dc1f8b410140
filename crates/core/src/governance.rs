//! Governance gate: authorization before, audit after every tool execution.

use serde::{Deserialize, Serialize};

use crate::agent::AutonomyLevel;
use crate::context::ExecutionContext;
use crate::tool::ToolOutcome;

/// The gate's answer for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Authorization {
    Allowed,
    Denied { reason: String },
}

impl Authorization {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// External authorization and audit collaborator.
///
/// Implementations are shared between concurrent loops and must guard their
/// own state.
pub trait GovernanceGate: Send + Sync {
    /// Decide whether a call may run.
    fn authorize(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        ctx: &ExecutionContext,
        autonomy: AutonomyLevel,
    ) -> Authorization;

    /// Record the fate of an authorized call: it ran, was cancelled
    /// mid-flight, or was stopped by the budget before running.
    fn audit(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        ctx: &ExecutionContext,
        outcome: &ToolOutcome,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_helpers() {
        assert!(Authorization::Allowed.is_allowed());
        let denied = Authorization::deny("nope");
        assert!(!denied.is_allowed());
        assert_eq!(
            serde_json::to_value(&denied).unwrap(),
            serde_json::json!({"decision": "denied", "reason": "nope"})
        );
    }
}
