//! The tool-use execution loop.
//!
//! A [`LoopController`] alternates between the model and the tools:
//!
//! 1. **Send** the transcript and tool specs to the model
//! 2. **If tool calls**: parse, authorize, budget-check and execute each one
//!    in order, appending one result per call
//! 3. **If text**: ask for confirmation once, then accept the answer
//!
//! The loop always ends with exactly one [`TerminationReason`], or with a
//! [`LoopError`] when the model client fails or the caller cancels.

pub mod error;
pub mod loop_runner;
pub mod output;
pub mod state;
pub mod termination;

#[cfg(test)]
mod test_helpers;

pub use error::LoopError;
pub use loop_runner::{CONFIRMATION_PROMPT, LoopController};
pub use output::{DEFAULT_OUTPUT_KEY, parse_final_output};
pub use state::{LoopProgress, LoopResult, LoopState, TerminationReason};
pub use termination::{Checkpoint, TerminationPolicy, TextTurn};
pub use tokio_util::sync::CancellationToken;
