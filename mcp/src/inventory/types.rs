//! Core types for the schema cache.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolloop_protocol::ToolDefinition;

use crate::{
    core::connection::DiscoveredTool,
    validation::{CompiledContract, ContractViolation},
};

/// Unique schema identifier: `connection_id:tool_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaKey {
    pub connection_id: String,
    pub tool_name: String,
}

impl SchemaKey {
    pub fn new(connection_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            tool_name: tool_name.into(),
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection_id, self.tool_name)
    }
}

/// Last-known input contract of one tool.
///
/// Entries are immutable once cached; a refresh replaces the whole entry,
/// compiled contract included.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub tool_name: String,
    pub connection_id: String,
    pub description: Option<String>,
    pub input_contract: Value,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip)]
    compiled: CompiledContract,
}

impl ToolSchema {
    pub fn new(
        connection_id: impl Into<String>,
        tool_name: impl Into<String>,
        input_contract: Value,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            connection_id: connection_id.into(),
            description: None,
            compiled: CompiledContract::compile(&input_contract),
            input_contract,
            fetched_at,
        }
    }

    pub fn from_discovered(
        connection_id: impl Into<String>,
        tool: DiscoveredTool,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tool_name: tool.name,
            connection_id: connection_id.into(),
            description: tool.description,
            compiled: CompiledContract::compile(&tool.input_schema),
            input_contract: tool.input_schema,
            fetched_at,
        }
    }

    pub fn key(&self) -> SchemaKey {
        SchemaKey::new(&self.connection_id, &self.tool_name)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, staleness: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > staleness
    }

    /// Check `arguments` against this contract.
    pub fn validate_arguments(
        &self,
        arguments: &Map<String, Value>,
    ) -> Result<(), ContractViolation> {
        self.compiled.validate(arguments, &self.input_contract)
    }

    /// Function-tool advertisement for the completion backend.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: self.input_contract.clone(),
        }
    }
}
