//! Configuration loading, validation, and management for toolloop.
//!
//! Loads configuration from `~/.toolloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use toolloop_core::agent::{AutonomyLevel, LoopConfig};

/// The root configuration structure.
///
/// Maps directly to `~/.toolloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Loop limits
    #[serde(default)]
    pub agent_loop: LoopConfig,

    /// Authorization rules for the policy gate
    #[serde(default)]
    pub governance: GovernanceConfig,

    /// Resource ceilings; absent means no budget tracker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetConfig>,

    /// Trace recording
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Default autonomy for callers that don't bring their own
    #[serde(default)]
    pub autonomy: AutonomyLevel,

    /// Tools that are never allowed
    #[serde(default)]
    pub denied_tools: Vec<String>,

    /// The only tools a `read_only` caller may use
    #[serde(default)]
    pub read_only_tools: Vec<String>,

    /// Tools a `supervised` caller may not use without escalation
    #[serde(default = "default_supervised_blocked")]
    pub supervised_blocked_tools: Vec<String>,

    /// Sliding window for `rate_limits`
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,

    /// Tool name → max authorized calls per window
    #[serde(default)]
    pub rate_limits: BTreeMap<String, u32>,
}

fn default_supervised_blocked() -> Vec<String> {
    vec!["shell".into(), "file_write".into()]
}
fn default_rate_window_secs() -> u64 {
    60
}

impl GovernanceConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            autonomy: AutonomyLevel::default(),
            denied_tools: vec![],
            read_only_tools: vec![],
            supervised_blocked_tools: default_supervised_blocked(),
            rate_window_secs: default_rate_window_secs(),
            rate_limits: BTreeMap::new(),
        }
    }
}

/// Resource ceilings for one invocation. Every limit is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Model calls (iteration checks) allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_llm_calls: Option<u32>,

    /// Tool executions allowed across all tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,

    /// Total tokens reported by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// Wall-clock budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,

    /// Tool name → executions allowed for that tool
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_tool: BTreeMap<String, u32>,
}

impl BudgetConfig {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether loop traces are recorded
    #[serde(default = "default_true")]
    pub tracing_enabled: bool,

    /// Completed traces kept in memory
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_traces() -> usize {
    100
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: true,
            max_traces: default_max_traces(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolloop/config.toml).
    ///
    /// Environment variables override the file:
    /// - `TOOLLOOP_MAX_ITERATIONS`
    /// - `TOOLLOOP_AUTONOMY`
    /// - `TOOLLOOP_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("TOOLLOOP_MAX_ITERATIONS") {
            self.agent_loop.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "TOOLLOOP_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = lookup("TOOLLOOP_AUTONOMY") {
            self.governance.autonomy = raw.parse().map_err(|e: String| {
                ConfigError::ValidationError(format!("TOOLLOOP_AUTONOMY: {e}"))
            })?;
        }

        if let Some(model) = lookup("TOOLLOOP_MODEL") {
            self.agent_loop.model = model;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lp = &self.agent_loop;
        if lp.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent_loop.max_iterations must be at least 1".into(),
            ));
        }
        if lp.max_tool_calls_per_iteration == 0 {
            return Err(ConfigError::ValidationError(
                "agent_loop.max_tool_calls_per_iteration must be at least 1".into(),
            ));
        }
        if lp.error_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "agent_loop.error_threshold must be at least 1".into(),
            ));
        }
        if lp.tool_call_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent_loop.tool_call_timeout_ms must be greater than 0".into(),
            ));
        }
        if !(0.0_f32..=2.0).contains(&lp.temperature) {
            return Err(ConfigError::ValidationError(
                "agent_loop.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.governance.rate_window_secs == 0 && !self.governance.rate_limits.is_empty() {
            return Err(ConfigError::ValidationError(
                "governance.rate_window_secs must be greater than 0 when rate_limits are set".into(),
            ));
        }

        if self.telemetry.max_traces == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.max_traces must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
