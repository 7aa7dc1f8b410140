//! Budget enforcement: the reference [`BudgetTracker`].
//!
//! Counts model calls, authorized tool executions and tokens, and measures
//! wall-clock time since [`BudgetEnforcer::start`]. A check that would go over
//! a limit is blocked and does not consume budget.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolloop_config::BudgetConfig;
use toolloop_core::budget::{BudgetDecision, BudgetTracker};
use toolloop_core::provider::Usage;

/// What has been spent so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub tokens: u64,
    pub per_tool: HashMap<String, u32>,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
struct Spent {
    llm_calls: u32,
    tool_calls: u32,
    tokens: u64,
    per_tool: HashMap<String, u32>,
    started: Instant,
}

impl Spent {
    fn fresh() -> Self {
        Self {
            llm_calls: 0,
            tool_calls: 0,
            tokens: 0,
            per_tool: HashMap::new(),
            started: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct BudgetEnforcer {
    limits: BudgetConfig,
    spent: Mutex<Spent>,
}

impl BudgetEnforcer {
    pub fn from_config(limits: &BudgetConfig) -> Self {
        Self {
            limits: limits.clone(),
            spent: Mutex::new(Spent::fresh()),
        }
    }

    pub fn limits(&self) -> &BudgetConfig {
        &self.limits
    }

    /// Reset all counters and restart the clock.
    pub fn start(&self) {
        *self.lock() = Spent::fresh();
    }

    pub fn usage(&self) -> BudgetUsage {
        let spent = self.lock();
        BudgetUsage {
            llm_calls: spent.llm_calls,
            tool_calls: spent.tool_calls,
            tokens: spent.tokens,
            per_tool: spent.per_tool.clone(),
            elapsed_ms: u64::try_from(spent.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Spent> {
        self.spent.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BudgetTracker for BudgetEnforcer {
    fn check_iteration_budget(&self) -> BudgetDecision {
        let mut spent = self.lock();

        if let Some(max) = self.limits.max_tokens
            && spent.tokens >= max
        {
            return BudgetDecision::blocked(format!("token budget exhausted ({}/{max})", spent.tokens));
        }
        if let Some(max) = self.limits.max_llm_calls
            && spent.llm_calls >= max
        {
            return BudgetDecision::blocked(format!("model call budget exhausted ({max} calls)"));
        }

        spent.llm_calls += 1;
        BudgetDecision::Allowed
    }

    fn check_tool_budget(&self, tool_name: &str, _arguments: &Value) -> BudgetDecision {
        let mut spent = self.lock();

        if let Some(max) = self.limits.max_tool_calls
            && spent.tool_calls >= max
        {
            return BudgetDecision::blocked(format!("tool call budget exhausted ({max} calls)"));
        }
        let used = spent.per_tool.get(tool_name).copied().unwrap_or(0);
        if let Some(&max) = self.limits.per_tool.get(tool_name)
            && used >= max
        {
            return BudgetDecision::blocked(format!(
                "budget for tool '{tool_name}' exhausted ({max} calls)"
            ));
        }

        spent.tool_calls += 1;
        *spent.per_tool.entry(tool_name.to_string()).or_default() += 1;
        BudgetDecision::Allowed
    }

    fn check_duration_budget(&self) -> BudgetDecision {
        let Some(max) = self.limits.max_duration() else {
            return BudgetDecision::Allowed;
        };
        let elapsed = self.lock().started.elapsed();
        if elapsed >= max {
            BudgetDecision::blocked(format!(
                "duration budget exhausted ({}ms of {}ms)",
                elapsed.as_millis(),
                max.as_millis()
            ))
        } else {
            BudgetDecision::Allowed
        }
    }

    fn record_usage(&self, usage: &Usage) {
        self.lock().tokens += u64::from(usage.total_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> BudgetConfig {
        BudgetConfig {
            max_llm_calls: Some(2),
            max_tool_calls: Some(3),
            max_tokens: Some(100),
            max_duration_secs: None,
            per_tool: [("search".to_string(), 1)].into_iter().collect(),
        }
    }

    #[test]
    fn model_calls_are_capped() {
        let budget = BudgetEnforcer::from_config(&limits());
        assert!(!budget.check_iteration_budget().is_blocked());
        assert!(!budget.check_iteration_budget().is_blocked());
        assert!(budget.check_iteration_budget().is_blocked());
        assert_eq!(budget.usage().llm_calls, 2);
    }

    #[test]
    fn tokens_block_the_next_turn() {
        let budget = BudgetEnforcer::from_config(&BudgetConfig {
            max_tokens: Some(100),
            ..BudgetConfig::default()
        });
        assert!(!budget.check_iteration_budget().is_blocked());
        budget.record_usage(&Usage::new(80, 30));
        match budget.check_iteration_budget() {
            BudgetDecision::Blocked { reason } => assert!(reason.contains("token budget")),
            BudgetDecision::Allowed => panic!("expected a block"),
        }
    }

    #[test]
    fn per_tool_and_global_tool_limits() {
        let budget = BudgetEnforcer::from_config(&limits());
        let args = json!({});
        assert!(!budget.check_tool_budget("search", &args).is_blocked());
        assert!(budget.check_tool_budget("search", &args).is_blocked());
        assert!(!budget.check_tool_budget("weather", &args).is_blocked());
        assert!(!budget.check_tool_budget("weather", &args).is_blocked());
        assert!(budget.check_tool_budget("weather", &args).is_blocked());

        let usage = budget.usage();
        assert_eq!(usage.tool_calls, 3);
        assert_eq!(usage.per_tool["search"], 1);
    }

    #[test]
    fn zero_duration_is_exhausted_immediately() {
        let budget = BudgetEnforcer::from_config(&BudgetConfig {
            max_duration_secs: Some(0),
            ..BudgetConfig::default()
        });
        assert!(budget.check_duration_budget().is_blocked());

        let generous = BudgetEnforcer::from_config(&BudgetConfig {
            max_duration_secs: Some(3600),
            ..BudgetConfig::default()
        });
        assert!(!generous.check_duration_budget().is_blocked());
    }

    #[test]
    fn start_resets_counters() {
        let budget = BudgetEnforcer::from_config(&limits());
        budget.check_iteration_budget();
        budget.record_usage(&Usage::new(5, 5));
        budget.start();
        assert_eq!(budget.usage().llm_calls, 0);
        assert_eq!(budget.usage().tokens, 0);
    }

    #[test]
    fn no_limits_allows_everything() {
        let budget = BudgetEnforcer::from_config(&BudgetConfig::default());
        for _ in 0..50 {
            assert!(!budget.check_iteration_budget().is_blocked());
            assert!(!budget.check_tool_budget("any", &json!({})).is_blocked());
        }
        assert!(!budget.check_duration_budget().is_blocked());
    }
}
