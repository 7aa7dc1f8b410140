//! Tool traits — the abstraction over agent capabilities.
//!
//! The loop only talks to a [`ToolExecutor`]. [`ToolRegistry`] is the stock
//! executor: a name → [`Tool`] map that folds every failure (unknown name,
//! tool error) into a [`ToolOutcome`] instead of returning an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool ran and produced output.
    Success { output: String },
    /// The tool could not run or reported an error (includes timeouts).
    Failure { error: String },
    /// The call was aborted by cancellation before it finished.
    Cancelled,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Text to hand back to the model as the tool-result message.
    pub fn to_message_content(&self) -> String {
        match self {
            Self::Success { output } => output.clone(),
            Self::Failure { error } => format!("Error: {error}"),
            Self::Cancelled => "Tool call cancelled before completion".to_string(),
        }
    }

    /// Short status label for logs and audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Executes tool calls by name. Implementations must be safe for concurrent use.
///
/// An unknown tool name is an ordinary failure outcome, never a panic or error.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> ToolOutcome;

    /// Whether a tool with this name is available.
    fn knows(&self, tool_name: &str) -> bool;
}

/// A single capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-parsed arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.get(tool_name) else {
            return ToolOutcome::failure(ToolError::NotFound(tool_name.to_string()).to_string());
        };
        match tool.execute(arguments, ctx).await {
            Ok(output) => ToolOutcome::success(output),
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }

    fn knows(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }
}
