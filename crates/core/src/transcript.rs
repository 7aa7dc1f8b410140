//! Transcript discipline. This is the only code path that mutates a conversation.
//!
//! A [`Transcript`] is append-only and always well-formed:
//!
//! - it starts with exactly one system message followed by a user message
//! - an assistant message issuing N tool calls is followed by exactly N tool
//!   messages, in the order the calls were issued, before anything else
//! - synthetic confirmation prompts are ordinary user messages

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::error::TranscriptError;
use crate::message::{Message, Role, ToolCallRequest};

/// An ordered, append-only message sequence with role invariants.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,

    /// Calls of the latest assistant message still waiting for a result, in issue order.
    #[serde(skip)]
    pending: VecDeque<ToolCallRequest>,
}

impl Transcript {
    /// Start a transcript from a system prompt and the initial user request.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            pending: VecDeque::new(),
        }
    }

    /// Adopt a caller-supplied message list, validating every invariant.
    ///
    /// The list may carry earlier history after the first two messages, but
    /// it must not end with unanswered tool calls.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, TranscriptError> {
        let mut iter = messages.into_iter();

        let system = iter.next().ok_or(TranscriptError::MissingSystem)?;
        if system.role != Role::System {
            return Err(TranscriptError::MissingSystem);
        }
        let user = iter.next().ok_or(TranscriptError::MissingInitialUser)?;
        if user.role != Role::User {
            return Err(TranscriptError::MissingInitialUser);
        }

        let mut transcript = Self {
            messages: vec![system, user],
            pending: VecDeque::new(),
        };

        for message in iter {
            match message.role {
                Role::System => return Err(TranscriptError::DuplicateSystem),
                Role::User => transcript.push_user(message.content)?,
                Role::Assistant => transcript.push_assistant(message)?,
                Role::Tool => {
                    let call_id = message
                        .tool_call_id
                        .clone()
                        .ok_or(TranscriptError::MissingCallId)?;
                    transcript.push_tool_result(&call_id, message.content)?;
                }
            }
        }

        if let Some(call) = transcript.pending.front() {
            return Err(TranscriptError::UnansweredCall(call.id.clone()));
        }
        Ok(transcript)
    }

    /// Append a model reply. Rejected while earlier tool calls are unanswered.
    pub fn push_assistant(&mut self, message: Message) -> Result<(), TranscriptError> {
        if message.role != Role::Assistant {
            return Err(TranscriptError::UnexpectedRole {
                expected: Role::Assistant,
                found: message.role,
            });
        }
        self.ensure_settled()?;

        let mut seen = HashSet::new();
        for call in &message.tool_calls {
            if !seen.insert(call.id.as_str()) {
                return Err(TranscriptError::DuplicateCallId(call.id.clone()));
            }
        }

        self.pending = message.tool_calls.iter().cloned().collect();
        self.messages.push(message);
        Ok(())
    }

    /// Answer the next pending tool call.
    ///
    /// Results must arrive in the order the calls were issued.
    pub fn push_tool_result(
        &mut self,
        call_id: &str,
        content: impl Into<String>,
    ) -> Result<(), TranscriptError> {
        let next = self
            .pending
            .front()
            .ok_or_else(|| TranscriptError::UnknownCallId(call_id.to_string()))?;
        if next.id != call_id {
            return Err(if self.pending.iter().any(|c| c.id == call_id) {
                TranscriptError::OutOfOrder {
                    expected: next.id.clone(),
                    found: call_id.to_string(),
                }
            } else {
                TranscriptError::UnknownCallId(call_id.to_string())
            });
        }

        if let Some(call) = self.pending.pop_front() {
            self.messages
                .push(Message::tool_result(call.id, call.name, content));
        }
        Ok(())
    }

    /// Append a user-role message (used for the confirmation prompt).
    pub fn push_user(&mut self, content: impl Into<String>) -> Result<(), TranscriptError> {
        self.ensure_settled()?;
        self.messages.push(Message::user(content));
        Ok(())
    }

    /// Answer every still-pending call with the same explanation.
    ///
    /// Returns how many calls were closed.
    pub fn close_pending(&mut self, explanation: &str) -> usize {
        let mut closed = 0;
        while let Some(call) = self.pending.pop_front() {
            self.messages
                .push(Message::tool_result(call.id, call.name, explanation));
            closed += 1;
        }
        closed
    }

    /// Calls still waiting for a result, in issue order.
    pub fn pending_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.pending.iter()
    }

    /// Whether every issued tool call has been answered.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent assistant message, if the model has replied yet.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    fn ensure_settled(&self) -> Result<(), TranscriptError> {
        match self.pending.front() {
            Some(call) => Err(TranscriptError::UnansweredCall(call.id.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, "{}")
    }

    #[test]
    fn new_transcript_has_system_then_user() {
        let t = Transcript::new("You are helpful", "Do the thing");
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].role, Role::System);
        assert_eq!(t.messages()[1].role, Role::User);
        assert!(t.is_settled());
    }

    #[test]
    fn from_messages_requires_leading_system() {
        let err = Transcript::from_messages(vec![Message::user("hi")]).unwrap_err();
        assert!(matches!(err, TranscriptError::MissingSystem));

        let err = Transcript::from_messages(vec![Message::system("s")]).unwrap_err();
        assert!(matches!(err, TranscriptError::MissingInitialUser));
    }

    #[test]
    fn from_messages_rejects_second_system() {
        let err = Transcript::from_messages(vec![
            Message::system("s"),
            Message::user("u"),
            Message::system("again"),
        ])
        .unwrap_err();
        assert!(matches!(err, TranscriptError::DuplicateSystem));
    }

    #[test]
    fn from_messages_accepts_answered_history() {
        let t = Transcript::from_messages(vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant_with_calls("", vec![call("c1", "echo")]),
            Message::tool_result("c1", "echo", "ok"),
            Message::assistant("done"),
        ])
        .unwrap();
        assert_eq!(t.len(), 5);
        assert!(t.is_settled());
    }

    #[test]
    fn from_messages_rejects_dangling_calls() {
        let err = Transcript::from_messages(vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant_with_calls("", vec![call("c1", "echo")]),
        ])
        .unwrap_err();
        assert!(matches!(err, TranscriptError::UnansweredCall(id) if id == "c1"));
    }

    #[test]
    fn assistant_blocked_until_calls_answered() {
        let mut t = Transcript::new("s", "u");
        t.push_assistant(Message::assistant_with_calls("", vec![call("c1", "a"), call("c2", "b")]))
            .unwrap();

        let err = t.push_assistant(Message::assistant("too soon")).unwrap_err();
        assert!(matches!(err, TranscriptError::UnansweredCall(_)));
        assert!(t.push_user("confirm?").is_err());

        t.push_tool_result("c1", "one").unwrap();
        t.push_tool_result("c2", "two").unwrap();
        t.push_assistant(Message::assistant("now fine")).unwrap();
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn tool_results_must_follow_issue_order() {
        let mut t = Transcript::new("s", "u");
        t.push_assistant(Message::assistant_with_calls("", vec![call("c1", "a"), call("c2", "b")]))
            .unwrap();

        let err = t.push_tool_result("c2", "early").unwrap_err();
        assert!(matches!(err, TranscriptError::OutOfOrder { .. }));

        let err = t.push_tool_result("nope", "x").unwrap_err();
        assert!(matches!(err, TranscriptError::UnknownCallId(_)));
    }

    #[test]
    fn tool_result_carries_tool_name() {
        let mut t = Transcript::new("s", "u");
        t.push_assistant(Message::assistant_with_calls("", vec![call("c1", "search")]))
            .unwrap();
        t.push_tool_result("c1", "found").unwrap();
        let last = t.messages().last().unwrap();
        assert_eq!(last.tool_name.as_deref(), Some("search"));
        assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn duplicate_call_ids_rejected() {
        let mut t = Transcript::new("s", "u");
        let err = t
            .push_assistant(Message::assistant_with_calls("", vec![call("c1", "a"), call("c1", "b")]))
            .unwrap_err();
        assert!(matches!(err, TranscriptError::DuplicateCallId(_)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn close_pending_answers_everything() {
        let mut t = Transcript::new("s", "u");
        t.push_assistant(Message::assistant_with_calls(
            "",
            vec![call("c1", "a"), call("c2", "b"), call("c3", "c")],
        ))
        .unwrap();
        t.push_tool_result("c1", "ok").unwrap();

        assert_eq!(t.close_pending("stopped"), 2);
        assert!(t.is_settled());
        assert_eq!(t.messages().last().unwrap().content, "stopped");
    }

    #[test]
    fn push_assistant_rejects_other_roles() {
        let mut t = Transcript::new("s", "u");
        let err = t.push_assistant(Message::user("x")).unwrap_err();
        assert!(matches!(err, TranscriptError::UnexpectedRole { .. }));
    }
}
