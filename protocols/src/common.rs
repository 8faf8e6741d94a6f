//! Types shared by both wire formats.

use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generate a prefixed identifier, e.g. `call_a1B2c3...`.
pub fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("{}_{}", prefix, suffix)
}

/// A tool advertised to the completion backend.
///
/// Variant-neutral; the adapter frames it as a chat `function` tool or a
/// responses `function` tool.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema of the accepted arguments.
    pub parameters: Value,
}
