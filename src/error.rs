//! Error types for the completion gateway, message adapter and tool loop.

use std::time::Duration;

use thiserror::Error;
use toolloop_protocol::PairingError;

/// Failure converting between canonical messages and a wire framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("tool message {index} has no tool_call_id")]
    MissingToolCallId { index: usize },

    #[error("backend response contained no choices")]
    NoChoices,

    #[error("unsupported {variant} item: {detail}")]
    Unsupported {
        variant: &'static str,
        detail: String,
    },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Backend unreachable or connection dropped.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("completion call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The backend refused the message sequence itself.
    #[error("backend rejected the message sequence: {0}")]
    StructuralRejection(String),

    #[error("backend returned {count} tool call(s) on a call with tools disabled")]
    UnexpectedToolCalls { count: usize },

    /// Caught locally before sending.
    #[error("outgoing history is not validly paired: {0}")]
    InvalidPairing(#[from] PairingError),

    #[error("history for a tool-disabled call still contains tool structure")]
    ToolStructureWithToolsDisabled,

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Retried with backoff inside the gateway; never seen by the tool loop
    /// unless the retry budget runs out.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Timeout(_) => true,
            GatewayError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Invalid message sequence, whether detected locally or by the backend.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GatewayError::StructuralRejection(_)
                | GatewayError::InvalidPairing(_)
                | GatewayError::ToolStructureWithToolsDisabled
        )
    }
}

/// Why a turn ended in `FAILED`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("completion call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("tool '{tool_name}' (call {call_id}) failed fatally: {detail}")]
    FatalTool {
        call_id: String,
        tool_name: String,
        detail: String,
    },

    #[error("turn cancelled: {0}")]
    Cancelled(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn is_structural(&self) -> bool {
        matches!(self, OrchestratorError::Gateway(e) if e.is_structural())
    }
}
