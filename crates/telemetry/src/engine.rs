//! Thread-safe trace recorder — collects loop traces and serves reports.

use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use toolloop_core::provider::Usage;
use toolloop_core::trace::{ActionRecord, TraceSink};

use crate::TelemetryError;
use crate::model::*;

/// The reference [`TraceSink`].
///
/// Thread-safe via `RwLock`; one recorder can be shared by many concurrent
/// loops. Keeps at most `max_traces` traces, dropping the oldest completed
/// ones first.
pub struct TraceRecorder {
    max_traces: usize,
    /// All retained traces (most recent last).
    traces: RwLock<VecDeque<LoopTrace>>,
    /// Running totals, including pruned traces.
    totals: RwLock<TraceTotals>,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(100)
    }
}

impl TraceRecorder {
    pub fn new(max_traces: usize) -> Self {
        Self {
            max_traces: max_traces.max(1),
            traces: RwLock::new(VecDeque::new()),
            totals: RwLock::new(TraceTotals::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<LoopTrace>> {
        self.traces.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<LoopTrace>> {
        self.traces.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update_totals(&self, f: impl FnOnce(&mut TraceTotals)) {
        let mut totals = self.totals.write().unwrap_or_else(|e| e.into_inner());
        f(&mut totals);
    }

    fn with_trace(&self, trace_id: &str, f: impl FnOnce(&mut LoopTrace)) {
        let mut traces = self.write();
        match traces.iter_mut().find(|t| t.id == trace_id) {
            Some(trace) => f(trace),
            None => tracing::debug!(trace_id, "Trace not retained, dropping record"),
        }
    }

    fn prune(traces: &mut VecDeque<LoopTrace>, max: usize) {
        while traces.len() >= max {
            match traces.iter().position(LoopTrace::is_complete) {
                Some(oldest_done) => {
                    traces.remove(oldest_done);
                }
                None => {
                    traces.pop_front();
                }
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Get a specific trace by ID.
    pub fn get_trace(&self, trace_id: &str) -> Option<LoopTrace> {
        self.read().iter().find(|t| t.id == trace_id).cloned()
    }

    /// Find the trace for an invocation.
    pub fn trace_for_invocation(&self, invocation_id: &str) -> Option<LoopTrace> {
        self.read()
            .iter()
            .find(|t| t.invocation_id == invocation_id)
            .cloned()
    }

    /// List recent traces (most recent first).
    pub fn recent_traces(&self, limit: usize) -> Vec<LoopTrace> {
        self.read().iter().rev().take(limit).cloned().collect()
    }

    /// Number of retained traces.
    pub fn trace_count(&self) -> usize {
        self.read().len()
    }

    pub fn totals(&self) -> TraceTotals {
        self.totals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Export one trace as pretty JSON.
    pub fn export_json(&self, trace_id: &str) -> Result<String, TelemetryError> {
        let trace = self
            .get_trace(trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        Ok(serde_json::to_string_pretty(&trace)?)
    }

    /// Export every retained trace as a JSON array.
    pub fn export_all_json(&self) -> Result<String, TelemetryError> {
        let traces: Vec<LoopTrace> = self.read().iter().cloned().collect();
        Ok(serde_json::to_string_pretty(&traces)?)
    }
}

impl TraceSink for TraceRecorder {
    fn start_trace(&self, invocation_id: &str) -> String {
        let trace = LoopTrace::new(invocation_id);
        let id = trace.id.clone();
        {
            let mut traces = self.write();
            Self::prune(&mut traces, self.max_traces);
            traces.push_back(trace);
        }
        self.update_totals(|t| t.traces += 1);
        id
    }

    fn start_step(&self, trace_id: &str, iteration: u32) {
        self.with_trace(trace_id, |trace| trace.steps.push(Step::new(iteration)));
    }

    fn record_model_call(&self, trace_id: &str, model: &str, usage: Option<&Usage>, tool_calls: usize) {
        let usage = usage.copied();
        self.with_trace(trace_id, |trace| {
            trace.current_step().model_call = Some(ModelCall {
                model: model.to_string(),
                usage,
                tool_calls,
            });
        });
        self.update_totals(|t| {
            t.llm_calls += 1;
            t.tokens += usage.map_or(0, |u| u64::from(u.total_tokens));
        });
    }

    fn record_action(&self, trace_id: &str, action: ActionRecord) {
        let failed = !action.status.is_success();
        self.with_trace(trace_id, |trace| {
            trace.current_step().actions.push(action.into());
        });
        self.update_totals(|t| {
            t.actions += 1;
            if failed {
                t.failed_actions += 1;
            }
        });
    }

    fn end_trace(&self, trace_id: &str, outcome: &str) {
        self.with_trace(trace_id, |trace| trace.end(outcome));
    }
}
