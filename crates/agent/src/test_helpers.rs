//! Scripted fakes for loop tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use toolloop_core::agent::AutonomyLevel;
use toolloop_core::budget::{BudgetDecision, BudgetTracker};
use toolloop_core::context::ExecutionContext;
use toolloop_core::error::ProviderError;
use toolloop_core::event::{Observation, ObservationSink};
use toolloop_core::governance::{Authorization, GovernanceGate};
use toolloop_core::message::ToolCallRequest;
use toolloop_core::provider::{ModelClient, ModelRequest, ModelResponse, Usage};
use toolloop_core::tool::{ToolExecutor, ToolOutcome};
use toolloop_core::trace::{ActionRecord, TraceSink};

/// Build a tool call request.
pub fn call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

/// Replays canned replies in order. Running past the end is an error.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    served: AtomicU32,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelResponse>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(replies: Vec<Result<ModelResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            served: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.served.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let served = self.served.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ProviderError::Exhausted(served as usize)))
    }
}

/// Replies with a tool call to `tool` on every turn, forever.
pub struct RepeatingModel {
    pub tool: String,
    pub arguments: String,
    pub calls_per_turn: usize,
    served: AtomicU32,
}

impl RepeatingModel {
    pub fn new(tool: &str, arguments: &str, calls_per_turn: usize) -> Self {
        Self {
            tool: tool.to_string(),
            arguments: arguments.to_string(),
            calls_per_turn,
            served: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for RepeatingModel {
    fn name(&self) -> &str {
        "repeating"
    }

    async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let turn = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        let calls = (0..self.calls_per_turn)
            .map(|i| call(&format!("t{turn}_{i}"), &self.tool, &self.arguments))
            .collect();
        Ok(ModelResponse::with_tool_calls("", calls).with_usage(10, 5))
    }
}

/// Never answers.
pub struct HangingModel;

#[async_trait]
impl ModelClient for HangingModel {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        std::future::pending().await
    }
}

/// How a fake tool behaves.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(String),
    Fail(String),
    /// Sleep, then succeed.
    Slow(Duration, String),
    /// Never finish.
    Hang,
}

/// Executor with per-tool scripted behavior that records every call.
#[derive(Default)]
pub struct CountingExecutor {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(tool.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, tool_name: &str, arguments: Value, _ctx: &ExecutionContext) -> ToolOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments));
        match self.behaviors.get(tool_name) {
            None => ToolOutcome::failure(format!("Tool not found: {tool_name}")),
            Some(Behavior::Succeed(out)) => ToolOutcome::success(out.clone()),
            Some(Behavior::Fail(err)) => ToolOutcome::failure(err.clone()),
            Some(Behavior::Slow(delay, out)) => {
                tokio::time::sleep(*delay).await;
                ToolOutcome::success(out.clone())
            }
            Some(Behavior::Hang) => std::future::pending().await,
        }
    }

    fn knows(&self, tool_name: &str) -> bool {
        self.behaviors.contains_key(tool_name)
    }
}

/// Gate that denies a fixed set of tools and records what it saw.
#[derive(Default)]
pub struct ScriptedGate {
    denied: HashSet<String>,
    authorized: Mutex<Vec<(String, String, AutonomyLevel)>>,
    audits: Mutex<Vec<(String, ToolOutcome)>>,
}

impl ScriptedGate {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn denying(tools: &[&str]) -> Self {
        Self {
            denied: tools.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    /// `(tool, caller, autonomy)` per authorization request.
    pub fn authorized(&self) -> Vec<(String, String, AutonomyLevel)> {
        self.authorized.lock().unwrap().clone()
    }

    pub fn audits(&self) -> Vec<(String, ToolOutcome)> {
        self.audits.lock().unwrap().clone()
    }
}

impl GovernanceGate for ScriptedGate {
    fn authorize(
        &self,
        tool_name: &str,
        _arguments: &Value,
        ctx: &ExecutionContext,
        autonomy: AutonomyLevel,
    ) -> Authorization {
        self.authorized
            .lock()
            .unwrap()
            .push((tool_name.to_string(), ctx.caller.clone(), autonomy));
        if self.denied.contains(tool_name) || !ctx.permits(tool_name) {
            Authorization::deny(format!("'{tool_name}' is not permitted"))
        } else {
            Authorization::Allowed
        }
    }

    fn audit(
        &self,
        tool_name: &str,
        _arguments: &Value,
        _ctx: &ExecutionContext,
        outcome: &ToolOutcome,
    ) {
        self.audits
            .lock()
            .unwrap()
            .push((tool_name.to_string(), outcome.clone()));
    }
}

/// Budget that blocks after a fixed number of allowed checks.
#[derive(Default)]
pub struct ScriptedBudget {
    iterations_allowed: Option<u32>,
    tools_allowed: Option<u32>,
    duration_blocked: AtomicBool,
    iteration_checks: AtomicU32,
    tool_checks: AtomicU32,
    tokens: AtomicU64,
}

impl ScriptedBudget {
    pub fn iterations(allowed: u32) -> Self {
        Self {
            iterations_allowed: Some(allowed),
            ..Self::default()
        }
    }

    pub fn tools(allowed: u32) -> Self {
        Self {
            tools_allowed: Some(allowed),
            ..Self::default()
        }
    }

    pub fn out_of_time() -> Self {
        let budget = Self::default();
        budget.duration_blocked.store(true, Ordering::SeqCst);
        budget
    }

    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }

    pub fn tool_checks(&self) -> u32 {
        self.tool_checks.load(Ordering::SeqCst)
    }
}

impl BudgetTracker for ScriptedBudget {
    fn check_iteration_budget(&self) -> BudgetDecision {
        let seen = self.iteration_checks.fetch_add(1, Ordering::SeqCst);
        match self.iterations_allowed {
            Some(allowed) if seen >= allowed => BudgetDecision::blocked("iteration budget spent"),
            _ => BudgetDecision::Allowed,
        }
    }

    fn check_tool_budget(&self, _tool_name: &str, _arguments: &Value) -> BudgetDecision {
        let seen = self.tool_checks.fetch_add(1, Ordering::SeqCst);
        match self.tools_allowed {
            Some(allowed) if seen >= allowed => BudgetDecision::blocked("tool budget spent"),
            _ => BudgetDecision::Allowed,
        }
    }

    fn check_duration_budget(&self) -> BudgetDecision {
        if self.duration_blocked.load(Ordering::SeqCst) {
            BudgetDecision::blocked("out of time")
        } else {
            BudgetDecision::Allowed
        }
    }

    fn record_usage(&self, usage: &Usage) {
        self.tokens
            .fetch_add(u64::from(usage.total_tokens), Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<Observation>>,
}

impl RecordingObserver {
    pub fn observations(&self) -> Vec<Observation> {
        self.seen.lock().unwrap().clone()
    }
}

impl ObservationSink for RecordingObserver {
    fn record(&self, observation: Observation) {
        self.seen.lock().unwrap().push(observation);
    }
}

/// Flattens trace callbacks into a readable log.
#[derive(Default)]
pub struct RecordingTracer {
    log: Mutex<Vec<String>>,
    actions: Mutex<Vec<ActionRecord>>,
}

impl RecordingTracer {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<ActionRecord> {
        self.actions.lock().unwrap().clone()
    }
}

impl TraceSink for RecordingTracer {
    fn start_trace(&self, invocation_id: &str) -> String {
        self.log.lock().unwrap().push("start".into());
        format!("trace-{invocation_id}")
    }

    fn start_step(&self, _trace_id: &str, iteration: u32) {
        self.log.lock().unwrap().push(format!("step {iteration}"));
    }

    fn record_model_call(&self, _trace_id: &str, _model: &str, _usage: Option<&Usage>, tool_calls: usize) {
        self.log.lock().unwrap().push(format!("model {tool_calls}"));
    }

    fn record_action(&self, _trace_id: &str, action: ActionRecord) {
        self.log
            .lock()
            .unwrap()
            .push(format!("action {} {}", action.tool_name, action.status.as_str()));
        self.actions.lock().unwrap().push(action);
    }

    fn end_trace(&self, _trace_id: &str, outcome: &str) {
        self.log.lock().unwrap().push(format!("end {outcome}"));
    }
}
