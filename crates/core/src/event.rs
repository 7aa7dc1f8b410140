//! Observations: what the loop saw, published to whoever is listening.
//!
//! The loop records one `llm_response` observation per model reply and one
//! `tool_call` observation per dispatched tool call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// The kind of event observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    LlmResponse,
    ToolCall,
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LlmResponse => write!(f, "llm_response"),
            Self::ToolCall => write!(f, "tool_call"),
        }
    }
}

/// One observed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(kind: ObservationKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Optional sink for observations.
pub trait ObservationSink: Send + Sync {
    fn record(&self, observation: Observation);
}

/// The "absent" sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl ObservationSink for NoObserver {
    fn record(&self, _observation: Observation) {}
}

/// A broadcast-based observation bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag rather than block the loop.
pub struct ObservationBus {
    sender: broadcast::Sender<Arc<Observation>>,
}

impl ObservationBus {
    /// Create a new bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive observations.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Observation>> {
        self.sender.subscribe()
    }
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ObservationSink for ObservationBus {
    fn record(&self, observation: Observation) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(observation));
    }
}
