//! Protocol types for the tool-calling loop.
//!
//! ## Modules
//!
//! - [`canonical`]: backend-agnostic conversation history (messages, tool calls, results)
//! - [`chat`]: role-paired wire format (`/v1/chat/completions`)
//! - [`responses`]: call-id paired wire format (`/v1/responses`)
//! - [`agent`]: caller-facing request/response shapes, including the legacy flat form
//! - [`common`]: shared tool definitions and id generation

pub mod agent;
pub mod canonical;
pub mod chat;
pub mod common;
pub mod responses;

pub use canonical::{
    has_tool_structure, validate_pairing, Message, PairingError, Role, ToolCall, ToolOutcome,
    ToolResult,
};
pub use common::{generate_id, ToolDefinition};
