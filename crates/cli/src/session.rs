//! Session scripts for `toolloop replay`.
//!
//! A session file pins down everything the loop would otherwise get from the
//! outside world: the seed messages, every model reply in order, and a canned
//! result per tool.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use toolloop_core::agent::AutonomyLevel;
use toolloop_core::context::ExecutionContext;
use toolloop_core::error::{ProviderError, ToolError};
use toolloop_core::message::{Message, ToolCallRequest};
use toolloop_core::provider::{ModelClient, ModelRequest, ModelResponse, Usage};
use toolloop_core::tool::{Tool, ToolRegistry};

#[derive(Debug, Deserialize)]
pub struct Session {
    pub system: String,
    pub user: String,

    #[serde(default)]
    pub caller: Option<String>,

    /// Overrides the configured autonomy
    #[serde(default)]
    pub autonomy: Option<AutonomyLevel>,

    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,

    pub turns: Vec<ScriptedTurn>,

    #[serde(default)]
    pub tools: BTreeMap<String, ScriptedToolSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptedTurn {
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub tool_calls: Vec<ScriptedCall>,

    #[serde(default)]
    pub usage: Option<ScriptedUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptedCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Raw string, or any JSON value (encoded before dispatch)
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScriptedUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedToolSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Allowed at `read_only` autonomy
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub delay_ms: u64,
}

impl Session {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session file {}", path.display()))?;
        let session: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse session file {}", path.display()))?;
        Ok(session)
    }

    pub fn seed(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }

    pub fn context(&self, default_autonomy: AutonomyLevel) -> ExecutionContext {
        let ctx = ExecutionContext::new(
            self.caller.clone().unwrap_or_else(|| "replay".into()),
            self.autonomy.unwrap_or(default_autonomy),
        );
        match &self.allowed_tools {
            Some(allowed) => ctx.narrowed(allowed.iter().cloned()),
            None => ctx,
        }
    }

    pub fn read_only_tools(&self) -> impl Iterator<Item = &str> {
        self.tools
            .iter()
            .filter(|(_, spec)| spec.read_only)
            .map(|(name, _)| name.as_str())
    }

    pub fn registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for (name, spec) in &self.tools {
            registry.register(Box::new(ScriptedTool {
                name: name.clone(),
                spec: spec.clone(),
            }));
        }
        registry
    }

    pub fn model(&self) -> ScriptedModelClient {
        let replies = self
            .turns
            .iter()
            .map(|turn| {
                let calls = turn
                    .tool_calls
                    .iter()
                    .map(|c| ToolCallRequest::new(&c.id, &c.name, encode_arguments(&c.arguments)))
                    .collect();
                ModelResponse {
                    content: turn.content.clone(),
                    tool_calls: calls,
                    usage: turn
                        .usage
                        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
                    model: "replay".into(),
                    ..ModelResponse::default()
                }
            })
            .collect();
        ScriptedModelClient::new(replies)
    }
}

fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::Null => String::new(),
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Hands out the scripted replies in order.
pub struct ScriptedModelClient {
    replies: Mutex<VecDeque<ModelResponse>>,
    served: Mutex<usize>,
}

impl ScriptedModelClient {
    pub fn new(replies: Vec<ModelResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            served: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        "replay"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        tracing::debug!(messages = request.messages.len(), "Replaying scripted turn");
        let mut served = self.served.lock().unwrap_or_else(|e| e.into_inner());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(reply) => {
                *served += 1;
                Ok(reply)
            }
            None => Err(ProviderError::Exhausted(*served)),
        }
    }
}

struct ScriptedTool {
    name: String,
    spec: ScriptedToolSpec,
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: Value, _ctx: &ExecutionContext) -> Result<String, ToolError> {
        if self.spec.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.delay_ms)).await;
        }
        match (&self.spec.error, &self.spec.output) {
            (Some(reason), _) => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.clone(),
            }),
            (None, Some(output)) => Ok(output.clone()),
            (None, None) => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolloop_core::tool::{ToolExecutor, ToolOutcome};

    fn session() -> Session {
        serde_json::from_value(json!({
            "system": "You are a weather bot.",
            "user": "Weather in Oslo?",
            "autonomy": "read_only",
            "turns": [
                {"tool_calls": [{"id": "c1", "name": "weather", "arguments": {"city": "Oslo"}}],
                 "usage": {"prompt_tokens": 10, "completion_tokens": 2}},
                {"content": "Sunny"}
            ],
            "tools": {
                "weather": {"output": "sunny", "read_only": true},
                "shell": {"error": "not here"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_session_and_builds_context() {
        let s = session();
        assert_eq!(s.turns.len(), 2);
        let ctx = s.context(AutonomyLevel::Full);
        assert_eq!(ctx.autonomy, AutonomyLevel::ReadOnly);
        assert_eq!(ctx.caller, "replay");
        assert_eq!(s.read_only_tools().collect::<Vec<_>>(), vec!["weather"]);
    }

    #[tokio::test]
    async fn scripted_model_replays_then_exhausts() {
        let model = session().model();
        let request = ModelRequest {
            model: "replay".into(),
            messages: vec![],
            tools: vec![],
            temperature: 0.0,
            max_tokens: None,
        };
        let first = model.complete(request.clone()).await.unwrap();
        assert_eq!(first.tool_calls[0].arguments, r#"{"city":"Oslo"}"#);
        assert_eq!(first.usage, Some(Usage::new(10, 2)));
        model.complete(request.clone()).await.unwrap();
        assert!(matches!(
            model.complete(request).await,
            Err(ProviderError::Exhausted(2))
        ));
    }

    #[tokio::test]
    async fn scripted_tools_return_output_or_error() {
        let registry = session().registry();
        let ctx = ExecutionContext::default();
        assert_eq!(
            registry.execute("weather", json!({}), &ctx).await,
            ToolOutcome::success("sunny")
        );
        assert!(!registry.execute("shell", json!({}), &ctx).await.succeeded());
    }

    #[test]
    fn string_arguments_pass_through_untouched() {
        assert_eq!(encode_arguments(&json!("{broken")), "{broken");
        assert_eq!(encode_arguments(&Value::Null), "");
    }
}
