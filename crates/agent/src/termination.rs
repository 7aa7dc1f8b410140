//! Termination & resource policy.
//!
//! Pure decisions over [`LoopState`] and collaborator signals. The controller
//! asks at fixed checkpoints and obeys; it never decides to stop on its own.

use toolloop_core::agent::LoopConfig;
use toolloop_core::budget::BudgetDecision;

use crate::state::{LoopState, TerminationReason};

/// Where in the loop the question is being asked, with the signals known there.
#[derive(Debug, Clone, Copy)]
pub enum Checkpoint<'a> {
    /// Before a model call, with the iteration budget answer.
    TurnStart { iteration_budget: &'a BudgetDecision },
    /// Before executing an authorized tool call, with the tool budget answer.
    ToolBudget { decision: &'a BudgetDecision },
    /// Right after a tool call failed.
    ToolFailed,
    /// After a turn finished, with the wall-clock budget answer.
    TurnEnd { duration_budget: &'a BudgetDecision },
    /// The model's text reply was accepted as final.
    AnswerAccepted,
}

/// What to do with a text-only reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTurn {
    /// Ask the model to verify and restate its answer.
    RequestConfirmation,
    /// Take the reply as the final answer.
    Accept,
}

#[derive(Debug, Clone, Copy)]
pub struct TerminationPolicy {
    max_iterations: u32,
    error_threshold: u32,
    double_confirmation: bool,
}

impl TerminationPolicy {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            error_threshold: config.error_threshold,
            double_confirmation: config.enable_double_confirmation,
        }
    }

    /// Decide whether the loop must stop at this checkpoint.
    pub fn evaluate(&self, state: &LoopState, checkpoint: Checkpoint<'_>) -> Option<TerminationReason> {
        match checkpoint {
            Checkpoint::TurnStart { iteration_budget } => {
                iteration_budget
                    .is_blocked()
                    .then_some(TerminationReason::BudgetExceeded)
            }
            Checkpoint::ToolBudget { decision } => {
                decision.is_blocked().then_some(TerminationReason::BudgetExceeded)
            }
            Checkpoint::ToolFailed => self.errors_exhausted(state).then_some(TerminationReason::Error),
            Checkpoint::TurnEnd { duration_budget } => {
                if self.errors_exhausted(state) {
                    Some(TerminationReason::Error)
                } else if duration_budget.is_blocked() {
                    Some(TerminationReason::DurationExceeded)
                } else if state.iterations() >= self.max_iterations {
                    Some(TerminationReason::MaxIterations)
                } else {
                    None
                }
            }
            Checkpoint::AnswerAccepted => Some(TerminationReason::Completed),
        }
    }

    /// Decide how to treat a reply without tool calls.
    ///
    /// With double confirmation on, the first text reply only earns a
    /// confirmation request; the one right after it is accepted.
    pub fn text_turn(&self, state: &LoopState) -> TextTurn {
        if self.double_confirmation && !state.awaiting_confirmation() {
            TextTurn::RequestConfirmation
        } else {
            TextTurn::Accept
        }
    }

    fn errors_exhausted(&self, state: &LoopState) -> bool {
        state.consecutive_errors() >= self.error_threshold
    }
}
