//! Tool-layer error types.
//!
//! [`McpError`] covers failures talking to tool connections. [`ToolErrorKind`]
//! is the domain classification of a failed invocation and decides whether a
//! call may be retried with corrected arguments.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool discovery failed on '{connection}': {message}")]
    Discovery { connection: String, message: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Tool disabled: {0}")]
    ToolDisabled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Sdk(#[from] Box<rmcp::RmcpError>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Whether the failure is a transport condition worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            McpError::Transport(_) | McpError::Timeout(_) | McpError::ConnectionFailed(_)
        )
    }

    /// Domain classification of a failure that reached the tool layer.
    pub fn tool_error_kind(&self) -> ToolErrorKind {
        match self {
            McpError::ToolNotFound(_) => ToolErrorKind::NotFound,
            McpError::InvalidArguments(_) => ToolErrorKind::InvalidArguments,
            McpError::PermissionDenied(_) => ToolErrorKind::PermissionDenied,
            McpError::ToolDisabled(_) | McpError::ConnectionNotFound(_) => ToolErrorKind::Disabled,
            McpError::Transport(_)
            | McpError::Timeout(_)
            | McpError::ConnectionFailed(_)
            | McpError::Io(_) => ToolErrorKind::Unavailable,
            McpError::ToolExecution(msg) => ToolErrorKind::classify_message(msg),
            McpError::Discovery { .. } | McpError::Config(_) | McpError::Sdk(_) => {
                ToolErrorKind::Execution
            }
        }
    }
}

/// Why a tool invocation failed, as reported by the external side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments rejected by the tool; the contract may have changed.
    InvalidArguments,
    /// A referenced entity or the tool itself was not found.
    NotFound,
    PermissionDenied,
    Disabled,
    RateLimited,
    /// The connection could not be reached.
    Unavailable,
    /// The tool ran and failed for any other reason.
    Execution,
}

impl ToolErrorKind {
    /// Only retryable kinds participate in the corrective retry protocol.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ToolErrorKind::PermissionDenied | ToolErrorKind::Disabled)
    }

    /// Whether the failure suggests the cached input contract is out of date.
    pub fn implicates_contract(&self) -> bool {
        matches!(self, ToolErrorKind::InvalidArguments)
    }

    /// Best-effort classification of a free-form error message.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&[
            "permission denied",
            "forbidden",
            "unauthorized",
            "not authorized",
            "access denied",
        ]) {
            ToolErrorKind::PermissionDenied
        } else if has(&["disabled", "not enabled", "deactivated"]) {
            ToolErrorKind::Disabled
        } else if has(&["rate limit", "too many requests", "quota"]) {
            ToolErrorKind::RateLimited
        } else if has(&[
            "invalid argument",
            "invalid params",
            "missing required",
            "required field",
            "required property",
            "unexpected field",
            "unknown field",
            "additional properties",
            "schema",
        ]) {
            ToolErrorKind::InvalidArguments
        } else if has(&["not found", "no such", "does not exist"]) {
            ToolErrorKind::NotFound
        } else {
            ToolErrorKind::Execution
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::PermissionDenied => "permission_denied",
            ToolErrorKind::Disabled => "disabled",
            ToolErrorKind::RateLimited => "rate_limited",
            ToolErrorKind::Unavailable => "unavailable",
            ToolErrorKind::Execution => "execution",
        };
        f.write_str(s)
    }
}
