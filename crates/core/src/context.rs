//! Execution context: who is asking, and which tools they may touch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::agent::AutonomyLevel;
use crate::message::ToolCallRequest;

/// Per-call context handed to the governance gate and the tool executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// The loop invocation this call belongs to
    #[serde(default)]
    pub invocation_id: String,

    /// Caller identity (user id, service name, ...)
    #[serde(default)]
    pub caller: String,

    /// How much the caller lets the agent do without escalation
    #[serde(default)]
    pub autonomy: AutonomyLevel,

    /// Tools the caller allows; `None` means no caller-side restriction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<BTreeSet<String>>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(caller: impl Into<String>, autonomy: AutonomyLevel) -> Self {
        Self {
            caller: caller.into(),
            autonomy,
            ..Default::default()
        }
    }

    /// Whether the caller-side allow-list admits this tool.
    pub fn permits(&self, tool_name: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|allowed| allowed.contains(tool_name))
    }

    /// Narrow the allow-list. Narrowing never widens access.
    pub fn narrowed<I, S>(&self, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested: BTreeSet<String> = allowed.into_iter().map(Into::into).collect();
        let allowed_tools = match &self.allowed_tools {
            Some(current) => current.intersection(&requested).cloned().collect(),
            None => requested,
        };
        Self {
            allowed_tools: Some(allowed_tools),
            ..self.clone()
        }
    }
}

/// Resolves the context for one tool call. Stateless lookups only.
pub trait ContextResolver: Send + Sync {
    fn resolve(&self, call: &ToolCallRequest, base: &ExecutionContext) -> ExecutionContext;
}

/// Hands back the base context unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughResolver;

impl ContextResolver for PassThroughResolver {
    fn resolve(&self, _call: &ToolCallRequest, base: &ExecutionContext) -> ExecutionContext {
        base.clone()
    }
}

/// Narrows every call to a caller-declared set of tools.
#[derive(Debug, Clone, Default)]
pub struct AllowListResolver {
    allowed: BTreeSet<String>,
}

impl AllowListResolver {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl ContextResolver for AllowListResolver {
    fn resolve(&self, _call: &ToolCallRequest, base: &ExecutionContext) -> ExecutionContext {
        base.narrowed(self.allowed.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_context_permits_everything() {
        let ctx = ExecutionContext::default();
        assert!(ctx.permits("anything"));
    }

    #[test]
    fn narrowing_intersects() {
        let ctx = ExecutionContext::default().narrowed(["read", "search"]);
        assert!(ctx.permits("read"));
        assert!(!ctx.permits("write"));

        let narrower = ctx.narrowed(["search", "write"]);
        assert!(narrower.permits("search"));
        assert!(!narrower.permits("read"));
        assert!(!narrower.permits("write"));
    }

    #[test]
    fn allow_list_resolver_narrows_base() {
        let resolver = AllowListResolver::new(["read"]);
        let call = ToolCallRequest::new("c1", "write", "{}");
        let ctx = resolver.resolve(&call, &ExecutionContext::new("alice", AutonomyLevel::Full));
        assert_eq!(ctx.caller, "alice");
        assert!(!ctx.permits("write"));
    }

    #[test]
    fn pass_through_keeps_context() {
        let base = ExecutionContext::new("bob", AutonomyLevel::ReadOnly);
        let call = ToolCallRequest::new("c1", "x", "{}");
        assert_eq!(PassThroughResolver.resolve(&call, &base), base);
    }
}
