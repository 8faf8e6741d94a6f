//! Canonical conversation history.
//!
//! Every backend framing is converted to and from these types, so the loop
//! itself never branches on wire format.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of the conversation.
///
/// `tool_calls` is only populated on assistant messages that request tools;
/// `tool_call_id` only on tool messages, where it names the call answered.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn requesting tools. `content` may be absent.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// Text content, empty when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ============================================================================
// Tool calls and results
// ============================================================================

/// A tool request parsed from a model response.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Verbatim argument text when the model produced something that is not
    /// a JSON object. `arguments` is empty in that case.
    pub raw_arguments: Option<String>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// Build from a wire-level JSON argument string.
    ///
    /// Blank strings count as `{}`. Anything that is not a JSON object is kept
    /// in `raw_arguments` so the dispatcher can report it.
    pub fn from_json_arguments(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: &str,
    ) -> Self {
        let trimmed = arguments.trim();
        if trimmed.is_empty() {
            return Self::new(id, tool_name, Map::new());
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Self::new(id, tool_name, map),
            _ => Self {
                id: id.into(),
                tool_name: tool_name.into(),
                arguments: Map::new(),
                raw_arguments: Some(arguments.to_string()),
            },
        }
    }

    /// Arguments as the JSON string sent on the wire.
    pub fn arguments_json(&self) -> String {
        match &self.raw_arguments {
            Some(raw) => raw.clone(),
            None => Value::Object(self.arguments.clone()).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success,
    RetryableError,
    FatalError,
}

/// Classified result of executing one [`ToolCall`].
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub output: Value,
    pub outcome: ToolOutcome,
    pub error_detail: Option<String>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            output,
            outcome: ToolOutcome::Success,
            error_detail: None,
        }
    }

    pub fn retryable(call: &ToolCall, detail: impl Into<String>) -> Self {
        Self::error(call, ToolOutcome::RetryableError, detail.into())
    }

    pub fn fatal(call: &ToolCall, detail: impl Into<String>) -> Self {
        Self::error(call, ToolOutcome::FatalError, detail.into())
    }

    fn error(call: &ToolCall, outcome: ToolOutcome, detail: String) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            output: json!({ "error": &detail }),
            outcome,
            error_detail: Some(detail),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ToolOutcome::Success
    }

    /// Text recorded in the tool-role message answering this call.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Tool-role message answering the originating call.
    pub fn to_message(&self) -> Message {
        Message::tool(self.call_id.clone(), self.output_text())
    }
}

// ============================================================================
// Pairing invariant
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("assistant message {index} repeats tool call id '{call_id}'")]
    DuplicateCallId { index: usize, call_id: String },

    #[error("assistant message {index} has unanswered tool calls: {call_ids:?}")]
    MissingResults { index: usize, call_ids: Vec<String> },

    #[error("tool message {index} answers unknown call '{call_id}'")]
    UnexpectedResult { index: usize, call_id: String },

    #[error("tool message {index} answers call '{call_id}' a second time")]
    DuplicateResult { index: usize, call_id: String },

    #[error("tool message {index} has no tool_call_id")]
    MissingToolCallId { index: usize },

    #[error("tool message {index} does not follow an assistant tool request")]
    OrphanToolMessage { index: usize },
}

/// Check that every assistant tool request is immediately answered by exactly
/// one tool message per call id, and that no tool message appears elsewhere.
pub fn validate_pairing(history: &[Message]) -> Result<(), PairingError> {
    let mut index = 0;
    while index < history.len() {
        let message = &history[index];
        match message.role {
            Role::Tool => return Err(PairingError::OrphanToolMessage { index }),
            Role::Assistant if !message.tool_calls.is_empty() => {
                let mut pending: Vec<&str> = Vec::with_capacity(message.tool_calls.len());
                for call in &message.tool_calls {
                    if pending.contains(&call.id.as_str()) {
                        return Err(PairingError::DuplicateCallId {
                            index,
                            call_id: call.id.clone(),
                        });
                    }
                    pending.push(&call.id);
                }

                let mut answered: HashSet<&str> = HashSet::with_capacity(pending.len());
                let mut cursor = index + 1;
                while let Some(reply) = history.get(cursor).filter(|m| m.role == Role::Tool) {
                    let Some(call_id) = reply.tool_call_id.as_deref() else {
                        return Err(PairingError::MissingToolCallId { index: cursor });
                    };
                    if !pending.contains(&call_id) {
                        return Err(PairingError::UnexpectedResult {
                            index: cursor,
                            call_id: call_id.to_string(),
                        });
                    }
                    if !answered.insert(call_id) {
                        return Err(PairingError::DuplicateResult {
                            index: cursor,
                            call_id: call_id.to_string(),
                        });
                    }
                    cursor += 1;
                }

                if answered.len() != pending.len() {
                    let call_ids = pending
                        .iter()
                        .filter(|id| !answered.contains(*id))
                        .map(|id| id.to_string())
                        .collect();
                    return Err(PairingError::MissingResults { index, call_ids });
                }
                index = cursor;
            }
            _ => index += 1,
        }
    }
    Ok(())
}

/// Whether any tool request or tool result remains in `history`.
pub fn has_tool_structure(history: &[Message]) -> bool {
    history
        .iter()
        .any(|m| m.role == Role::Tool || !m.tool_calls.is_empty() || m.tool_call_id.is_some())
}
