//! Fatal loop errors.
//!
//! Ordinary tool and policy failures never show up here; they end the loop
//! with a [`TerminationReason`](crate::state::TerminationReason) instead.

use thiserror::Error;
use toolloop_core::error::{ProviderError, TranscriptError};

use crate::state::LoopProgress;

#[derive(Debug, Error)]
pub enum LoopError {
    /// The model client failed. Retrying is the caller's call.
    #[error("model client failed: {0}")]
    Provider(#[from] ProviderError),

    /// The seed transcript (or a collaborator) broke a transcript invariant.
    #[error("transcript invariant violated: {0}")]
    Transcript(#[from] TranscriptError),

    /// The caller cancelled the invocation. In-flight work was audited as cancelled.
    #[error("loop cancelled after {} iteration(s)", .0.iterations)]
    Cancelled(Box<LoopProgress>),
}

impl LoopError {
    /// Partial progress, when the error carries any.
    pub fn progress(&self) -> Option<&LoopProgress> {
        match self {
            Self::Cancelled(progress) => Some(progress),
            _ => None,
        }
    }
}
