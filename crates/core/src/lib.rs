//! # toolloop core
//!
//! Domain types, collaborator traits, and error definitions for the toolloop
//! tool-use execution loop. The loop itself lives in `toolloop-agent`; this
//! crate defines the contracts it consumes.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here and is injected into the loop, never
//! looked up from global state. Optional collaborators (budget, observation,
//! trace) ship with a no-op implementation so call sites never branch on
//! "is it present". This enables:
//! - Deterministic tests with scripted fakes
//! - Swapping governance, budget and trace backends via configuration
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod budget;
pub mod context;
pub mod error;
pub mod event;
pub mod governance;
pub mod message;
pub mod provider;
pub mod tool;
pub mod trace;
pub mod transcript;

// Re-export key types at crate root for ergonomics
pub use agent::{AutonomyLevel, LoopConfig};
pub use budget::{BudgetDecision, BudgetTracker, NoBudget};
pub use context::{AllowListResolver, ContextResolver, ExecutionContext, PassThroughResolver};
pub use error::{Error, ProviderError, Result, ToolError, TranscriptError};
pub use event::{NoObserver, Observation, ObservationBus, ObservationKind, ObservationSink};
pub use governance::{Authorization, GovernanceGate};
pub use message::{Message, Role, ToolCallRequest};
pub use provider::{FinishReason, ModelClient, ModelRequest, ModelResponse, ToolDefinition, Usage};
pub use tool::{Tool, ToolExecutor, ToolOutcome, ToolRegistry};
pub use trace::{ActionRecord, ActionStatus, NoTrace, TraceSink};
pub use transcript::Transcript;
