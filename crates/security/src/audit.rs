//! Audit logging — structured record of every governed tool call.
//!
//! The policy gate writes one entry per denial and one per executed (or
//! cancelled) call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use toolloop_core::tool::ToolOutcome;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub actor: String,
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// An authorized tool call ran, was aborted mid-flight, or was stopped by the budget
    ToolExecution { tool_name: String },
    /// A tool call was refused before it ran
    ToolDenied { tool_name: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
    Cancelled,
}

impl From<&ToolOutcome> for AuditOutcome {
    fn from(outcome: &ToolOutcome) -> Self {
        match outcome {
            ToolOutcome::Success { .. } => Self::Success,
            ToolOutcome::Failure { .. } => Self::Failure,
            ToolOutcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// In-memory audit logger that also forwards to its sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        for sink in &self.sinks {
            sink.record(&entry);
        }
        self.lock().push(entry);
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Get entries with the given outcome.
    pub fn entries_by_outcome(&self, outcome: AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            target = %entry.target,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}
