//! The tool-use loop controller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use toolloop_core::agent::LoopConfig;
use toolloop_core::budget::{BudgetDecision, BudgetTracker, NoBudget};
use toolloop_core::context::{ContextResolver, ExecutionContext, PassThroughResolver};
use toolloop_core::error::{ProviderError, TranscriptError};
use toolloop_core::event::{NoObserver, Observation, ObservationKind, ObservationSink};
use toolloop_core::governance::{Authorization, GovernanceGate};
use toolloop_core::message::{Message, ToolCallRequest};
use toolloop_core::provider::{ModelClient, ModelRequest, ModelResponse, ToolDefinition};
use toolloop_core::tool::{ToolExecutor, ToolOutcome};
use toolloop_core::trace::{ActionRecord, ActionStatus, NoTrace, TraceSink};
use toolloop_core::transcript::Transcript;

use crate::error::LoopError;
use crate::output::{parse_arguments, parse_final_output};
use crate::state::{LoopResult, LoopState, TerminationReason};
use crate::termination::{Checkpoint, TerminationPolicy, TextTurn};

/// Synthetic user message sent after the first text-only reply.
pub const CONFIRMATION_PROMPT: &str = "Before finishing, verify all parts of the task are \
complete and all results are checked before restating your answer.";

/// Drives one model ↔ tools exchange to a terminal state.
///
/// The controller holds only shared, read-only configuration and
/// collaborators; every [`run`](Self::run) owns its own [`LoopState`], so one
/// controller can serve many concurrent invocations.
pub struct LoopController {
    config: LoopConfig,
    policy: TerminationPolicy,

    /// The model client
    model: Arc<dyn ModelClient>,

    /// Tool executor (usually a `ToolRegistry`)
    tools: Arc<dyn ToolExecutor>,

    /// Authorization + audit
    governance: Arc<dyn GovernanceGate>,

    /// Per-call context lookup
    resolver: Arc<dyn ContextResolver>,

    /// Optional resource ceilings
    budget: Arc<dyn BudgetTracker>,

    /// Optional observation sink
    observer: Arc<dyn ObservationSink>,

    /// Optional trace sink
    tracer: Arc<dyn TraceSink>,

    /// Caller context every call starts from
    context: ExecutionContext,
}

impl LoopController {
    /// Create a controller with the required collaborators.
    ///
    /// Optional collaborators default to their no-op implementations.
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolExecutor>,
        governance: Arc<dyn GovernanceGate>,
        config: LoopConfig,
    ) -> Self {
        Self {
            policy: TerminationPolicy::new(&config),
            config,
            model,
            tools,
            governance,
            resolver: Arc::new(PassThroughResolver),
            budget: Arc::new(NoBudget),
            observer: Arc::new(NoObserver),
            tracer: Arc::new(NoTrace),
            context: ExecutionContext::default(),
        }
    }

    /// Attach a budget / enforcement tracker.
    pub fn with_budget(mut self, budget: Arc<dyn BudgetTracker>) -> Self {
        self.budget = budget;
        self
    }

    /// Attach an observation sink.
    pub fn with_observer(mut self, observer: Arc<dyn ObservationSink>) -> Self {
        self.observer = observer;
        self
    }

    /// Attach a trace sink.
    pub fn with_tracer(mut self, tracer: Arc<dyn TraceSink>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Replace the per-call context resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ContextResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the caller context (identity, autonomy, allow-list).
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop to a terminal state.
    pub async fn run(
        &self,
        initial_messages: Vec<Message>,
        tool_specs: Vec<ToolDefinition>,
    ) -> Result<LoopResult, LoopError> {
        self.run_with_cancellation(initial_messages, tool_specs, CancellationToken::new())
            .await
    }

    /// Run the loop, stopping early if `cancel` fires.
    ///
    /// A tool call in flight when the token fires is aborted and audited
    /// with [`ToolOutcome::Cancelled`].
    pub async fn run_with_cancellation(
        &self,
        initial_messages: Vec<Message>,
        tool_specs: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> Result<LoopResult, LoopError> {
        let transcript = Transcript::from_messages(initial_messages)?;
        let invocation = Invocation::start(&self.context, self.tracer.as_ref());

        info!(
            invocation_id = %invocation.id,
            messages = transcript.len(),
            tools = tool_specs.len(),
            max_iterations = self.config.max_iterations,
            "Starting tool loop"
        );

        let mut state = LoopState::new(transcript);
        match self.drive(&mut state, &invocation, &tool_specs, &cancel).await {
            Ok(output) => {
                let reason = state.termination_reason().unwrap_or(TerminationReason::Error);
                self.tracer.end_trace(&invocation.trace_id, reason.as_str());
                info!(
                    invocation_id = %invocation.id,
                    reason = %reason,
                    iterations = state.iterations(),
                    tool_calls = state.tool_calls_made(),
                    tokens = state.total_tokens(),
                    "Tool loop finished"
                );
                let elapsed = invocation.elapsed_ms();
                Ok(state.into_result(invocation.id, output, elapsed))
            }
            Err(Interrupt::Cancelled) => {
                self.tracer.end_trace(&invocation.trace_id, "cancelled");
                warn!(
                    invocation_id = %invocation.id,
                    iterations = state.iterations(),
                    "Tool loop cancelled"
                );
                Err(LoopError::Cancelled(Box::new(state.into_progress(invocation.id))))
            }
            Err(Interrupt::Fatal(err)) => {
                self.tracer.end_trace(&invocation.trace_id, "fatal");
                warn!(invocation_id = %invocation.id, error = %err, "Tool loop aborted");
                Err(err)
            }
        }
    }

    /// The outer loop. Returns the parsed final output once a termination
    /// reason has been recorded on `state`.
    async fn drive(
        &self,
        state: &mut LoopState,
        inv: &Invocation,
        tool_specs: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>, Interrupt> {
        loop {
            let iteration = state.begin_iteration();
            self.tracer.start_step(&inv.trace_id, iteration);

            let iteration_budget = self.budget.check_iteration_budget();
            if let Some(reason) = self.policy.evaluate(
                state,
                Checkpoint::TurnStart {
                    iteration_budget: &iteration_budget,
                },
            ) {
                warn!(iteration, decision = ?iteration_budget, "Iteration budget exhausted");
                state.terminate(reason);
                return Ok(Map::new());
            }

            debug!(invocation_id = %inv.id, iteration, "Calling model");
            let request = ModelRequest {
                model: self.config.model.clone(),
                messages: state.transcript().messages().to_vec(),
                tools: tool_specs.to_vec(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                response = self.model.complete(request) => response?,
            };
            self.record_reply(state, inv, iteration, &response);

            let ModelResponse {
                content,
                tool_calls,
                ..
            } = response;
            let calls = normalize_calls(tool_calls, iteration);
            state
                .transcript
                .push_assistant(Message::assistant_with_calls(content.clone(), calls.clone()))?;

            if calls.is_empty() {
                match self.policy.text_turn(state) {
                    TextTurn::RequestConfirmation => {
                        debug!(iteration, "Text reply, requesting confirmation");
                        state.transcript.push_user(CONFIRMATION_PROMPT)?;
                        state.set_awaiting_confirmation(true);
                    }
                    TextTurn::Accept => {
                        let reason = self
                            .policy
                            .evaluate(state, Checkpoint::AnswerAccepted)
                            .unwrap_or(TerminationReason::Completed);
                        state.terminate(reason);
                        return Ok(parse_final_output(&content));
                    }
                }
            } else {
                state.set_awaiting_confirmation(false);
                if let Some(reason) = self.dispatch_batch(state, inv, iteration, &calls, cancel).await? {
                    state.terminate(reason);
                    return Ok(Map::new());
                }
            }

            let duration_budget = self.budget.check_duration_budget();
            if let Some(reason) = self.policy.evaluate(
                state,
                Checkpoint::TurnEnd {
                    duration_budget: &duration_budget,
                },
            ) {
                debug!(iteration, reason = %reason, "Stopping after turn");
                state.terminate(reason);
                return Ok(Map::new());
            }
        }
    }

    fn record_reply(&self, state: &mut LoopState, inv: &Invocation, iteration: u32, response: &ModelResponse) {
        state.record_reply(response.usage, &response.model);
        if let Some(usage) = &response.usage {
            self.budget.record_usage(usage);
        }
        self.tracer.record_model_call(
            &inv.trace_id,
            &response.model,
            response.usage.as_ref(),
            response.tool_calls.len(),
        );

        let mut observation = Observation::new(ObservationKind::LlmResponse, response.content.clone())
            .with_meta("invocation_id", inv.id.clone())
            .with_meta("iteration", iteration)
            .with_meta("model", response.model.clone())
            .with_meta("tool_calls", response.tool_calls.len());
        if let Some(usage) = &response.usage {
            observation = observation.with_meta("tokens", usage.total_tokens);
        }
        self.observer.record(observation);
    }

    /// Dispatch the calls of one reply, strictly in order.
    ///
    /// Returns a termination reason if the batch ended the loop.
    async fn dispatch_batch(
        &self,
        state: &mut LoopState,
        inv: &Invocation,
        iteration: u32,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Result<Option<TerminationReason>, Interrupt> {
        let cap = self.config.max_tool_calls_per_iteration;
        let (accepted, deferred) = calls.split_at(calls.len().min(cap));
        debug!(
            iteration,
            requested = calls.len(),
            deferred = deferred.len(),
            "Executing tool calls"
        );

        for call in accepted {
            match self.dispatch_call(state, inv, iteration, call, cancel).await? {
                Dispatch::Continue => {}
                Dispatch::Stop(reason) => {
                    let closed = state
                        .transcript
                        .close_pending(&format!("Tool call not executed: loop terminated ({reason})"));
                    debug!(closed, reason = %reason, "Closed remaining tool calls");
                    return Ok(Some(reason));
                }
            }
        }

        if !deferred.is_empty() {
            warn!(iteration, deferred = deferred.len(), cap, "Per-turn tool call limit reached");
        }
        for call in deferred {
            state.transcript.push_tool_result(
                &call.id,
                format!(
                    "Tool call deferred: at most {cap} tool calls are executed per turn. \
                     Re-issue this call in a later turn if it is still needed."
                ),
            )?;
        }
        Ok(None)
    }

    async fn dispatch_call(
        &self,
        state: &mut LoopState,
        inv: &Invocation,
        iteration: u32,
        call: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Result<Dispatch, Interrupt> {
        let started = Instant::now();
        let ctx = self.resolver.resolve(call, &inv.context);

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(reason) => {
                warn!(tool = %call.name, call_id = %call.id, %reason, "Unparsable tool arguments");
                let message = format!(
                    "Error: invalid arguments for tool '{}': {reason}. Send the arguments as a JSON object.",
                    call.name
                );
                return self.reject(state, inv, iteration, call, ActionStatus::InvalidArguments, message, started);
            }
        };

        if let Authorization::Denied { reason } =
            self.governance
                .authorize(&call.name, &arguments, &ctx, ctx.autonomy)
        {
            warn!(tool = %call.name, call_id = %call.id, %reason, "Tool call denied");
            let message = format!("Tool call denied: {reason}");
            return self.reject(state, inv, iteration, call, ActionStatus::Denied, message, started);
        }

        let decision = self.budget.check_tool_budget(&call.name, &arguments);
        if let Some(reason) = self
            .policy
            .evaluate(state, Checkpoint::ToolBudget { decision: &decision })
        {
            warn!(tool = %call.name, call_id = %call.id, decision = ?decision, "Tool budget exhausted");
            let detail = match decision {
                BudgetDecision::Blocked { reason } => reason,
                BudgetDecision::Allowed => String::new(),
            };
            // The gate already admitted this call; close its audit trail.
            self.governance.audit(
                &call.name,
                &arguments,
                &ctx,
                &ToolOutcome::failure(format!("not executed: {detail}")),
            );
            self.record_tool_call(inv, iteration, call, ActionStatus::Blocked, detail, started);
            return Ok(Dispatch::Stop(reason));
        }

        let timeout = self.config.tool_call_timeout();
        let execution = tokio::time::timeout(
            timeout,
            self.tools.execute(&call.name, arguments.clone(), &ctx),
        );
        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = execution => Some(result),
        };

        let (outcome, status) = match finished {
            None => {
                let outcome = ToolOutcome::Cancelled;
                self.governance.audit(&call.name, &arguments, &ctx, &outcome);
                state
                    .transcript
                    .push_tool_result(&call.id, outcome.to_message_content())?;
                state.transcript.close_pending("Tool call not executed: loop cancelled");
                self.record_tool_call(
                    inv,
                    iteration,
                    call,
                    ActionStatus::Cancelled,
                    outcome.to_message_content(),
                    started,
                );
                return Err(Interrupt::Cancelled);
            }
            Some(Ok(outcome)) => {
                let status = if outcome.succeeded() {
                    ActionStatus::Succeeded
                } else {
                    ActionStatus::Failed
                };
                (outcome, status)
            }
            Some(Err(_elapsed)) => (
                ToolOutcome::failure(format!(
                    "tool '{}' timed out after {}ms",
                    call.name,
                    timeout.as_millis()
                )),
                ActionStatus::TimedOut,
            ),
        };

        self.governance.audit(&call.name, &arguments, &ctx, &outcome);
        let content = outcome.to_message_content();
        state.transcript.push_tool_result(&call.id, content.clone())?;
        self.record_tool_call(inv, iteration, call, status, content, started);

        if outcome.succeeded() {
            debug!(tool = %call.name, call_id = %call.id, "Tool call succeeded");
            state.record_success(&call.name);
            Ok(Dispatch::Continue)
        } else {
            warn!(tool = %call.name, call_id = %call.id, status = status.as_str(), "Tool call failed");
            state.record_failure();
            Ok(self.after_failure(state))
        }
    }

    /// Answer a call that never reached the executor.
    #[allow(clippy::too_many_arguments)]
    fn reject(
        &self,
        state: &mut LoopState,
        inv: &Invocation,
        iteration: u32,
        call: &ToolCallRequest,
        status: ActionStatus,
        message: String,
        started: Instant,
    ) -> Result<Dispatch, Interrupt> {
        state.transcript.push_tool_result(&call.id, message.clone())?;
        state.record_failure();
        self.record_tool_call(inv, iteration, call, status, message, started);
        Ok(self.after_failure(state))
    }

    fn after_failure(&self, state: &LoopState) -> Dispatch {
        match self.policy.evaluate(state, Checkpoint::ToolFailed) {
            Some(reason) => Dispatch::Stop(reason),
            None => Dispatch::Continue,
        }
    }

    /// One observation and one trace action per dispatched call.
    fn record_tool_call(
        &self,
        inv: &Invocation,
        iteration: u32,
        call: &ToolCallRequest,
        status: ActionStatus,
        content: String,
        started: Instant,
    ) {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.observer.record(
            Observation::new(ObservationKind::ToolCall, content.clone())
                .with_meta("invocation_id", inv.id.clone())
                .with_meta("iteration", iteration)
                .with_meta("tool", call.name.clone())
                .with_meta("call_id", call.id.clone())
                .with_meta("status", status.as_str())
                .with_meta("duration_ms", duration_ms),
        );

        self.tracer.record_action(
            &inv.trace_id,
            ActionRecord {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                status,
                detail: (!status.is_success() && !content.is_empty()).then_some(content),
                duration_ms,
            },
        );
    }
}

/// Identity and clock of one invocation.
struct Invocation {
    id: String,
    trace_id: String,
    context: ExecutionContext,
    started: Instant,
}

impl Invocation {
    fn start(base: &ExecutionContext, tracer: &dyn TraceSink) -> Self {
        let id = Uuid::new_v4().to_string();
        let trace_id = tracer.start_trace(&id);
        let context = ExecutionContext {
            invocation_id: id.clone(),
            ..base.clone()
        };
        Self {
            id,
            trace_id,
            context,
            started: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// What to do after one call.
enum Dispatch {
    Continue,
    Stop(TerminationReason),
}

/// Ways the loop can end without a [`LoopResult`].
enum Interrupt {
    Cancelled,
    Fatal(LoopError),
}

impl From<ProviderError> for Interrupt {
    fn from(err: ProviderError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<TranscriptError> for Interrupt {
    fn from(err: TranscriptError) -> Self {
        Self::Fatal(err.into())
    }
}

/// Give every call a usable, unique id. Empty or repeated ids are replaced
/// so each call can be answered exactly once.
fn normalize_calls(calls: Vec<ToolCallRequest>, iteration: u32) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .enumerate()
        .map(|(index, mut call)| {
            if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
                call.id = format!("call_{iteration}_{index}");
                seen.insert(call.id.clone());
            }
            call
        })
        .collect()
}
