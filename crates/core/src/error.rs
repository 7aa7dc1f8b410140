//! Error types for the toolloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::message::Role;

/// The top-level error type for toolloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model client errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Transcript errors ---
    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Faults of the model client transport. Retrying is the caller's business.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Scripted provider exhausted after {0} responses")]
    Exhausted(usize),
}

/// Failures raised by tool implementations.
///
/// These never cross the loop boundary: the registry folds them into a
/// failure [`ToolOutcome`](crate::tool::ToolOutcome).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Structural violations of the transcript invariants.
///
/// The loop never produces these on its own; seeing one means a caller
/// handed in a malformed history or a collaborator broke its contract.
#[derive(Debug, Clone, Error)]
pub enum TranscriptError {
    #[error("transcript must start with a system message")]
    MissingSystem,

    #[error("transcript must have a user message right after the system message")]
    MissingInitialUser,

    #[error("transcript may contain only one system message")]
    DuplicateSystem,

    #[error("expected a message with role {expected}, found {found}")]
    UnexpectedRole { expected: Role, found: Role },

    #[error("tool call {0} has not been answered yet")]
    UnansweredCall(String),

    #[error("tool result references unknown call id {0}")]
    UnknownCallId(String),

    #[error("tool result for {found} arrived before the result for {expected}")]
    OutOfOrder { expected: String, found: String },

    #[error("tool call id {0} appears twice in one reply")]
    DuplicateCallId(String),

    #[error("tool message without a tool_call_id")]
    MissingCallId,
}
