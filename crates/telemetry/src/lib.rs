//! Loop tracing and budget enforcement for toolloop.
//!
//! Provides the reference trace sink (`TraceRecorder`: trace → step →
//! action, bounded retention, JSON export) and the reference budget tracker
//! (`BudgetEnforcer`: model-call, tool-call, per-tool, token and wall-clock
//! limits).

pub mod budget;
pub mod engine;
pub mod model;

pub use budget::{BudgetEnforcer, BudgetUsage};
pub use engine::TraceRecorder;
pub use model::{Action, LoopTrace, ModelCall, Step, TraceTotals};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown trace id: {0}")]
    UnknownTrace(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
