//! Trace sink: one trace per loop invocation, one step per iteration,
//! one action per tool call.

use serde::{Deserialize, Serialize};

use crate::provider::Usage;

/// How a dispatched tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    TimedOut,
    Denied,
    /// Stopped by the budget tracker; the loop ended here.
    Blocked,
    InvalidArguments,
    Cancelled,
}

impl ActionStatus {
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Denied => "denied",
            Self::Blocked => "blocked",
            Self::InvalidArguments => "invalid_arguments",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One tool call as seen by the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub call_id: String,
    pub tool_name: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Optional trace collaborator.
///
/// Trace ids are handed out by the sink; the loop passes them back verbatim.
pub trait TraceSink: Send + Sync {
    fn start_trace(&self, invocation_id: &str) -> String;
    fn start_step(&self, trace_id: &str, iteration: u32);
    fn record_model_call(&self, trace_id: &str, model: &str, usage: Option<&Usage>, tool_calls: usize);
    fn record_action(&self, trace_id: &str, action: ActionRecord);
    fn end_trace(&self, trace_id: &str, outcome: &str);
}

/// The "absent" sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrace;

impl TraceSink for NoTrace {
    fn start_trace(&self, invocation_id: &str) -> String {
        invocation_id.to_string()
    }
    fn start_step(&self, _trace_id: &str, _iteration: u32) {}
    fn record_model_call(&self, _trace_id: &str, _model: &str, _usage: Option<&Usage>, _tool_calls: usize) {}
    fn record_action(&self, _trace_id: &str, _action: ActionRecord) {}
    fn end_trace(&self, _trace_id: &str, _outcome: &str) {}
}
