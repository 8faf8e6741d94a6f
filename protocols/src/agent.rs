//! Caller-facing agent request and response shapes.
//!
//! [`AgentRequest`] is the canonical inbound form. Older clients still send a
//! flat [`LegacyAgentRequest`]; [`IncomingRequest`] accepts either.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

// ============================================================================
// Canonical request
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AgentRequest {
    #[validate(nested)]
    pub message: InboundMessage,
    #[validate(nested)]
    pub context: RequestContext,
    #[serde(default)]
    #[validate(nested)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct InboundMessage {
    #[validate(length(min = 1, message = "message content cannot be empty"))]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RequestContext {
    #[validate(length(min = 1, message = "agent_id is required"))]
    pub agent_id: String,
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "conversation_id is required"))]
    pub conversation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct RequestOptions {
    #[serde(default)]
    #[validate(nested)]
    pub memory: MemoryOptions,
    #[serde(default)]
    pub state: StateOptions,
    #[serde(default)]
    pub response: ResponseOptions,
}

/// Long-term memory retrieval options, forwarded to the memory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MemoryOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_relevance")]
    #[validate(range(min = 0.0, max = 1.0, message = "min_relevance must be in [0, 1]"))]
    pub min_relevance: f64,
    #[serde(default = "default_max_results")]
    #[validate(range(min = 1, message = "max_results must be at least 1"))]
    pub max_results: u32,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            min_relevance: default_min_relevance(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOptions {
    #[serde(default)]
    pub save_checkpoint: bool,
    #[serde(default = "default_true")]
    pub include_shared: bool,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            save_checkpoint: false,
            include_shared: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseOptions {
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    #[serde(default = "default_true")]
    pub include_metrics: bool,
    #[serde(default)]
    pub stream: bool,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            include_metrics: true,
            stream: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_relevance() -> f64 {
    0.3
}

fn default_max_results() -> u32 {
    10
}

// ============================================================================
// Legacy request
// ============================================================================

/// Flat request shape from older clients. Option blocks are optional and
/// filled with fixed defaults on upconversion.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyAgentRequest {
    pub message: String,
    pub agent_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub stream: Option<bool>,
    pub memory: Option<MemoryOptions>,
    pub state: Option<StateOptions>,
    pub response: Option<ResponseOptions>,
}

/// Either request shape. The canonical form is tried first; it is the only
/// one whose `message` is an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncomingRequest {
    Canonical(AgentRequest),
    Legacy(LegacyAgentRequest),
}

// ============================================================================
// Responses
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub data: ResponseData,
    pub metadata: Option<Value>,
    pub metrics: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: OutboundContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundContent {
    pub text: String,
}

impl AgentResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: ResponseData {
                message: OutboundMessage {
                    content: OutboundContent { text: text.into() },
                },
            },
            metadata: None,
            metrics: None,
        }
    }

    /// Primary text field, `data.message.content.text`.
    pub fn primary_text(&self) -> &str {
        &self.data.message.content.text
    }

    /// Down-convert for clients that expect the flat legacy shape.
    pub fn to_legacy(&self, conversation_id: Option<String>) -> LegacyAgentResponse {
        LegacyAgentResponse {
            response: self.primary_text().to_string(),
            conversation_id,
            metadata: self.metadata.clone(),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyAgentResponse {
    pub response: String,
    pub conversation_id: Option<String>,
    pub metadata: Option<Value>,
}
