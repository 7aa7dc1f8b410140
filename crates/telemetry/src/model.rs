//! Data model for loop traces: one trace per invocation, one step per
//! iteration, one action per dispatched tool call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use toolloop_core::provider::Usage;
use toolloop_core::trace::{ActionRecord, ActionStatus};

// ── Action ────────────────────────────────────────────────────────────────

/// One tool call as recorded in a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub call_id: String,
    pub tool_name: String,
    pub status: ActionStatus,
    /// Error, denial reason, or similar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl From<ActionRecord> for Action {
    fn from(record: ActionRecord) -> Self {
        Self {
            call_id: record.call_id,
            tool_name: record.tool_name,
            status: record.status,
            detail: record.detail,
            duration_ms: record.duration_ms,
            recorded_at: Utc::now(),
        }
    }
}

// ── Step ──────────────────────────────────────────────────────────────────

/// A model call made during a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCall {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Tool calls the model asked for.
    pub tool_calls: usize,
}

/// One loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_call: Option<ModelCall>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Step {
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            started_at: Utc::now(),
            model_call: None,
            actions: Vec::new(),
        }
    }

    pub fn tokens(&self) -> u64 {
        self.model_call
            .as_ref()
            .and_then(|c| c.usage)
            .map_or(0, |u| u64::from(u.total_tokens))
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// Everything recorded for one loop invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopTrace {
    /// Unique trace id.
    pub id: String,
    /// The invocation this trace belongs to.
    pub invocation_id: String,
    pub steps: Vec<Step>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Termination reason, `cancelled` or `fatal`.
    pub outcome: Option<String>,
}

impl LoopTrace {
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            steps: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Mark the trace as complete.
    pub fn end(&mut self, outcome: impl Into<String>) {
        self.ended_at = Some(Utc::now());
        self.outcome = Some(outcome.into());
    }

    /// The step actions are currently recorded into.
    ///
    /// Actions arriving before any step get an implicit step 0.
    pub fn current_step(&mut self) -> &mut Step {
        if self.steps.is_empty() {
            self.steps.push(Step::new(0));
        }
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.steps.iter().flat_map(|s| s.actions.iter())
    }

    pub fn total_tokens(&self) -> u64 {
        self.steps.iter().map(Step::tokens).sum()
    }

    pub fn llm_call_count(&self) -> usize {
        self.steps.iter().filter(|s| s.model_call.is_some()).count()
    }

    pub fn action_count(&self) -> usize {
        self.actions().count()
    }

    pub fn failed_action_count(&self) -> usize {
        self.actions().filter(|a| !a.status.is_success()).count()
    }

    /// Wall-clock duration in milliseconds, once ended.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| {
            end.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64
        })
    }
}

// ── Aggregated views ──────────────────────────────────────────────────────

/// Running totals across every trace the recorder has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceTotals {
    pub traces: u64,
    pub llm_calls: u64,
    pub actions: u64,
    pub failed_actions: u64,
    pub tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(tool: &str, status: ActionStatus) -> Action {
        ActionRecord {
            call_id: "c".into(),
            tool_name: tool.into(),
            status,
            detail: None,
            duration_ms: 3,
        }
        .into()
    }

    #[test]
    fn trace_aggregation() {
        let mut trace = LoopTrace::new("inv-1");

        let mut s1 = Step::new(1);
        s1.model_call = Some(ModelCall {
            model: "m".into(),
            usage: Some(Usage::new(100, 50)),
            tool_calls: 2,
        });
        s1.actions.push(action("weather", ActionStatus::Succeeded));
        s1.actions.push(action("shell", ActionStatus::Denied));
        trace.steps.push(s1);

        let mut s2 = Step::new(2);
        s2.model_call = Some(ModelCall {
            model: "m".into(),
            usage: None,
            tool_calls: 0,
        });
        trace.steps.push(s2);

        trace.end("completed");

        assert_eq!(trace.total_tokens(), 150);
        assert_eq!(trace.llm_call_count(), 2);
        assert_eq!(trace.action_count(), 2);
        assert_eq!(trace.failed_action_count(), 1);
        assert!(trace.is_complete());
        assert!(trace.duration_ms().is_some());
    }

    #[test]
    fn actions_before_a_step_get_step_zero() {
        let mut trace = LoopTrace::new("inv");
        trace
            .current_step()
            .actions
            .push(action("x", ActionStatus::Failed));
        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.steps[0].iteration, 0);
    }

    #[test]
    fn trace_serializes_statuses_snake_case() {
        let mut trace = LoopTrace::new("inv-42");
        trace
            .current_step()
            .actions
            .push(action("calc", ActionStatus::TimedOut));
        trace.end("error");

        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["steps"][0]["actions"][0]["status"], "timed_out");
        assert_eq!(json["outcome"], "error");
    }
}
