//! Policy gate — the reference governance gate.
//!
//! Rules, checked in order:
//! - Deny list → always denied
//! - Caller allow-list (from the execution context) → must contain the tool
//! - Autonomy: `read_only` allows only read-only tools, `supervised` blocks
//!   the escalation list, `full` allows everything
//! - Per-tool rate limit over a sliding window (authorized calls only)

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use toolloop_config::GovernanceConfig;
use toolloop_core::agent::AutonomyLevel;
use toolloop_core::context::ExecutionContext;
use toolloop_core::governance::{Authorization, GovernanceGate};
use toolloop_core::tool::ToolOutcome;

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};

pub struct PolicyGate {
    denied: BTreeSet<String>,
    read_only: BTreeSet<String>,
    supervised_blocked: BTreeSet<String>,
    rate_limits: BTreeMap<String, u32>,
    window: Duration,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
    audit: Arc<AuditLogger>,
}

impl std::fmt::Debug for PolicyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyGate")
            .field("denied", &self.denied)
            .field("read_only", &self.read_only)
            .field("supervised_blocked", &self.supervised_blocked)
            .field("rate_limits", &self.rate_limits)
            .field("window", &self.window)
            .finish()
    }
}

impl PolicyGate {
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self {
            denied: config.denied_tools.iter().cloned().collect(),
            read_only: config.read_only_tools.iter().cloned().collect(),
            supervised_blocked: config.supervised_blocked_tools.iter().cloned().collect(),
            rate_limits: config.rate_limits.clone(),
            window: config.rate_window(),
            history: Mutex::new(HashMap::new()),
            audit: Arc::new(AuditLogger::new()),
        }
    }

    /// Share an audit logger (e.g. one with a [`TracingSink`](crate::audit::TracingSink)).
    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit_logger(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    fn check_static(&self, tool_name: &str, ctx: &ExecutionContext, autonomy: AutonomyLevel) -> Result<(), String> {
        if self.denied.contains(tool_name) {
            return Err(format!("tool '{tool_name}' is on the deny list"));
        }

        if !ctx.permits(tool_name) {
            return Err(format!("tool '{tool_name}' is not in the caller's allow-list"));
        }

        match autonomy {
            AutonomyLevel::ReadOnly if !self.read_only.contains(tool_name) => {
                Err(format!("tool '{tool_name}' is not permitted at read_only autonomy"))
            }
            AutonomyLevel::Supervised if self.supervised_blocked.contains(tool_name) => Err(format!(
                "tool '{tool_name}' requires escalation at supervised autonomy"
            )),
            _ => Ok(()),
        }
    }

    /// Sliding-window check; records the call when it is admitted.
    fn check_rate(&self, tool_name: &str, now: Instant) -> Result<(), String> {
        let Some(&limit) = self.rate_limits.get(tool_name) else {
            return Ok(());
        };

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let calls = history.entry(tool_name.to_string()).or_default();
        while calls
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= self.window)
        {
            calls.pop_front();
        }

        if calls.len() >= limit as usize {
            return Err(format!(
                "rate limit for '{tool_name}' reached ({limit} calls per {}s)",
                self.window.as_secs()
            ));
        }
        calls.push_back(now);
        Ok(())
    }

    fn authorize_at(
        &self,
        tool_name: &str,
        ctx: &ExecutionContext,
        autonomy: AutonomyLevel,
        now: Instant,
    ) -> Authorization {
        let verdict = self
            .check_static(tool_name, ctx, autonomy)
            .and_then(|()| self.check_rate(tool_name, now));

        match verdict {
            Ok(()) => Authorization::Allowed,
            Err(reason) => {
                tracing::warn!(tool = tool_name, caller = %ctx.caller, %autonomy, %reason, "Tool call denied by policy");
                self.audit.log(
                    AuditEvent::ToolDenied {
                        tool_name: tool_name.to_string(),
                    },
                    actor(&ctx.caller),
                    tool_name,
                    AuditOutcome::Denied,
                    Some(reason.clone()),
                );
                Authorization::deny(reason)
            }
        }
    }
}

fn actor(caller: &str) -> &str {
    if caller.is_empty() { "agent" } else { caller }
}

impl GovernanceGate for PolicyGate {
    fn authorize(
        &self,
        tool_name: &str,
        _arguments: &Value,
        ctx: &ExecutionContext,
        autonomy: AutonomyLevel,
    ) -> Authorization {
        self.authorize_at(tool_name, ctx, autonomy, Instant::now())
    }

    fn audit(
        &self,
        tool_name: &str,
        arguments: &Value,
        ctx: &ExecutionContext,
        outcome: &ToolOutcome,
    ) {
        let details = match outcome {
            ToolOutcome::Failure { error } => format!("{arguments} → {error}"),
            _ => arguments.to_string(),
        };
        self.audit.log(
            AuditEvent::ToolExecution {
                tool_name: tool_name.to_string(),
            },
            actor(&ctx.caller),
            tool_name,
            AuditOutcome::from(outcome),
            Some(details),
        );
    }
}
