//! Per-invocation loop state and the result it turns into.
//!
//! A [`LoopState`] is owned by exactly one running loop and never shared.
//! It is consumed into a [`LoopResult`] (or a [`LoopProgress`] on fatal
//! exits) when the loop stops.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use toolloop_core::message::Message;
use toolloop_core::provider::Usage;
use toolloop_core::transcript::Transcript;

/// Why the loop stopped. Exactly one is recorded per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model gave a (confirmed) final answer.
    Completed,
    /// The iteration cap was reached.
    MaxIterations,
    /// Consecutive tool failures reached the error threshold.
    Error,
    /// An external budget tracker blocked further work.
    BudgetExceeded,
    /// The wall-clock budget ran out.
    DurationExceeded,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxIterations => "max_iterations",
            Self::Error => "error",
            Self::BudgetExceeded => "budget_exceeded",
            Self::DurationExceeded => "duration_exceeded",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable counters and transcript for one running loop.
#[derive(Debug)]
pub struct LoopState {
    iterations: u32,
    total_tokens: u64,
    tool_calls_made: u32,
    tools_used: BTreeSet<String>,
    pub(crate) transcript: Transcript,
    consecutive_errors: u32,
    awaiting_confirmation: bool,
    termination_reason: Option<TerminationReason>,
    last_usage: Option<Usage>,
    last_model: String,
}

impl LoopState {
    pub fn new(transcript: Transcript) -> Self {
        Self {
            iterations: 0,
            total_tokens: 0,
            tool_calls_made: 0,
            tools_used: BTreeSet::new(),
            transcript,
            consecutive_errors: 0,
            awaiting_confirmation: false,
            termination_reason: None,
            last_usage: None,
            last_model: String::new(),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn tool_calls_made(&self) -> u32 {
        self.tool_calls_made
    }

    pub fn tools_used(&self) -> &BTreeSet<String> {
        &self.tools_used
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    /// A new model turn begins.
    pub(crate) fn begin_iteration(&mut self) -> u32 {
        self.iterations += 1;
        self.iterations
    }

    pub(crate) fn record_reply(&mut self, usage: Option<Usage>, model: &str) {
        if let Some(usage) = usage {
            self.total_tokens += u64::from(usage.total_tokens);
        }
        self.last_usage = usage;
        if !model.is_empty() {
            self.last_model = model.to_string();
        }
    }

    pub(crate) fn record_success(&mut self, tool_name: &str) {
        self.consecutive_errors = 0;
        self.tool_calls_made += 1;
        self.tools_used.insert(tool_name.to_string());
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_errors += 1;
    }

    pub(crate) fn set_awaiting_confirmation(&mut self, awaiting: bool) {
        self.awaiting_confirmation = awaiting;
    }

    /// Record why the loop stopped.
    ///
    /// Recording twice is a bug in the controller, not a runtime condition.
    pub(crate) fn terminate(&mut self, reason: TerminationReason) -> TerminationReason {
        debug_assert!(
            self.termination_reason.is_none(),
            "termination reason recorded twice: {:?} then {reason:?}",
            self.termination_reason
        );
        *self.termination_reason.get_or_insert(reason)
    }

    /// Snapshot of progress, used on fatal exits.
    pub(crate) fn into_progress(self, invocation_id: String) -> LoopProgress {
        LoopProgress {
            invocation_id,
            iterations: self.iterations,
            tokens_used: self.total_tokens,
            tool_calls_made: self.tool_calls_made,
            tools_used: self.tools_used.into_iter().collect(),
            transcript: self.transcript.into_messages(),
        }
    }

    /// Consume the state into the final result.
    pub(crate) fn into_result(
        self,
        invocation_id: String,
        output: serde_json::Map<String, serde_json::Value>,
        duration_ms: u64,
    ) -> LoopResult {
        let raw_response = self
            .transcript
            .last_assistant()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        // Every exit path records a reason before converting.
        let termination_reason = self
            .termination_reason
            .unwrap_or(TerminationReason::Error);

        LoopResult {
            invocation_id,
            output,
            raw_response,
            tokens_used: self.total_tokens,
            usage: self.last_usage,
            model: self.last_model,
            iterations: self.iterations,
            tool_calls_made: self.tool_calls_made,
            tools_used: self.tools_used.into_iter().collect(),
            termination_reason,
            duration_ms,
            transcript: self.transcript.into_messages(),
        }
    }
}

/// The immutable outcome of one loop invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResult {
    pub invocation_id: String,

    /// Key/value mapping parsed from the final confirmed answer
    /// (empty unless the loop completed)
    pub output: serde_json::Map<String, serde_json::Value>,

    /// Text of the last assistant message
    pub raw_response: String,

    /// Tokens consumed across all model calls
    pub tokens_used: u64,

    /// Usage reported by the last model reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Model that produced the last reply
    pub model: String,

    pub iterations: u32,
    pub tool_calls_made: u32,
    pub tools_used: Vec<String>,
    pub termination_reason: TerminationReason,
    pub duration_ms: u64,

    /// The full transcript, including tool results and confirmation prompts
    pub transcript: Vec<Message>,
}

impl LoopResult {
    pub fn completed(&self) -> bool {
        self.termination_reason == TerminationReason::Completed
    }
}

/// Partial progress handed back when the loop ends without a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopProgress {
    pub invocation_id: String,
    pub iterations: u32,
    pub tokens_used: u64,
    pub tool_calls_made: u32,
    pub tools_used: Vec<String>,
    pub transcript: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> LoopState {
        LoopState::new(Transcript::new("s", "u"))
    }

    #[test]
    fn success_resets_consecutive_errors() {
        let mut s = state();
        s.record_failure();
        s.record_failure();
        assert_eq!(s.consecutive_errors(), 2);

        s.record_success("search");
        assert_eq!(s.consecutive_errors(), 0);
        assert_eq!(s.tool_calls_made(), 1);
        assert!(s.tools_used().contains("search"));
    }

    #[test]
    fn tools_used_is_a_set() {
        let mut s = state();
        s.record_success("a");
        s.record_success("a");
        s.record_success("b");
        assert_eq!(s.tools_used().len(), 2);
        assert_eq!(s.tool_calls_made(), 3);
    }

    #[test]
    fn record_reply_accumulates_tokens() {
        let mut s = state();
        s.record_reply(Some(Usage::new(10, 5)), "m1");
        s.record_reply(None, "");
        s.record_reply(Some(Usage::new(1, 1)), "m2");
        assert_eq!(s.total_tokens(), 17);

        let result = {
            s.terminate(TerminationReason::Completed);
            s.into_result("inv".into(), serde_json::Map::new(), 0)
        };
        assert_eq!(result.model, "m2");
        assert_eq!(result.usage, Some(Usage::new(1, 1)));
    }

    #[test]
    fn termination_reason_serializes_snake_case() {
        let json = serde_json::to_string(&TerminationReason::BudgetExceeded).unwrap();
        assert_eq!(json, "\"budget_exceeded\"");
        assert_eq!(TerminationReason::MaxIterations.to_string(), "max_iterations");
    }

    #[test]
    #[should_panic(expected = "recorded twice")]
    #[cfg(debug_assertions)]
    fn double_termination_is_a_bug() {
        let mut s = state();
        s.terminate(TerminationReason::Completed);
        s.terminate(TerminationReason::Error);
    }

    #[test]
    fn raw_response_is_last_assistant_text() {
        let mut s = state();
        s.transcript
            .push_assistant(Message::assistant("first"))
            .unwrap();
        s.transcript.push_user("again").unwrap();
        s.transcript
            .push_assistant(Message::assistant("second"))
            .unwrap();
        s.terminate(TerminationReason::MaxIterations);
        let result = s.into_result("inv".into(), serde_json::Map::new(), 3);
        assert_eq!(result.raw_response, "second");
        assert_eq!(result.transcript.len(), 5);
        assert!(!result.completed());
    }
}
