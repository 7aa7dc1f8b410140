//! Loop configuration and autonomy types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable, caller-supplied limits for one loop invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard cap on model turns
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Tool calls executed per model turn; extra calls are deferred
    #[serde(default = "default_max_tool_calls_per_iteration")]
    pub max_tool_calls_per_iteration: usize,

    /// Require a second text-only reply before accepting an answer
    #[serde(default = "default_true")]
    pub enable_double_confirmation: bool,

    /// Consecutive tool failures that end the loop
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// Per tool call timeout
    #[serde(default = "default_tool_call_timeout_ms")]
    pub tool_call_timeout_ms: u64,

    /// Model requested from the client
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_max_iterations() -> u32 {
    20
}
fn default_max_tool_calls_per_iteration() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_error_threshold() -> u32 {
    3
}
fn default_tool_call_timeout_ms() -> u64 {
    30_000
}
fn default_model() -> String {
    "default".into()
}
fn default_temperature() -> f32 {
    0.2
}

impl LoopConfig {
    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_call_timeout_ms)
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_tool_calls_per_iteration(mut self, max: usize) -> Self {
        self.max_tool_calls_per_iteration = max;
        self
    }

    pub fn with_double_confirmation(mut self, enabled: bool) -> Self {
        self.enable_double_confirmation = enabled;
        self
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_tool_call_timeout(mut self, timeout: Duration) -> Self {
        self.tool_call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls_per_iteration: default_max_tool_calls_per_iteration(),
            enable_double_confirmation: true,
            error_threshold: default_error_threshold(),
            tool_call_timeout_ms: default_tool_call_timeout_ms(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// How much freedom the agent has to act.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Can only read, never execute
    ReadOnly,
    /// Must ask permission for destructive actions (default)
    #[default]
    Supervised,
    /// Full autonomy, executes everything
    Full,
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read_only"),
            Self::Supervised => write!(f, "supervised"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read_only" | "readonly" => Ok(Self::ReadOnly),
            "supervised" => Ok(Self::Supervised),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown autonomy level '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomy_defaults_to_supervised() {
        assert_eq!(AutonomyLevel::default(), AutonomyLevel::Supervised);
    }

    #[test]
    fn loop_config_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.max_tool_calls_per_iteration, 5);
        assert!(config.enable_double_confirmation);
        assert_eq!(config.error_threshold, 3);
        assert_eq!(config.tool_call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn loop_config_deserializes_partial() {
        let config: LoopConfig = serde_json::from_str(r#"{"max_iterations": 4}"#).unwrap();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.error_threshold, 3);
    }

    #[test]
    fn autonomy_parses_from_str() {
        assert_eq!("read_only".parse::<AutonomyLevel>(), Ok(AutonomyLevel::ReadOnly));
        assert_eq!("FULL".parse::<AutonomyLevel>(), Ok(AutonomyLevel::Full));
        assert!("reckless".parse::<AutonomyLevel>().is_err());
    }
}
