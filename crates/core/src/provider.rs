//! Model client trait — the abstraction over LLM backends.
//!
//! A model client knows how to send a transcript plus tool specifications to
//! an LLM and get one reply back. Wire protocols, retries and streaming live
//! behind this trait; the loop only sees complete replies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};

/// Configuration for a model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The transcript so far
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

/// One complete reply from the model.
///
/// `tool_calls` is empty exactly when the reply is a plain textual answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Textual content (may be empty, also alongside tool calls)
    #[serde(default)]
    pub content: String,

    /// Requested tool calls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    #[serde(default)]
    pub finish_reason: FinishReason,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

impl ModelResponse {
    /// A plain text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: FinishReason::Stop,
            ..Default::default()
        }
    }

    /// A reply requesting tool calls.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: FinishReason::ToolCalls,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some(Usage::new(prompt_tokens, completion_tokens));
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Convert into the assistant message that goes into the transcript.
    ///
    /// Both content and tool calls are kept.
    pub fn to_message(&self) -> Message {
        Message::assistant_with_calls(self.content.clone(), self.tool_calls.clone())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// The model client trait.
///
/// Every LLM backend implements this. The loop calls `complete()` without
/// knowing which backend is in use.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openrouter", "scripted").
    fn name(&self) -> &str;

    /// Send a request and get a complete reply.
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError>;
}
