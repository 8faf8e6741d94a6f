//! Tool connection boundary.
//!
//! Each external tool server is reached through a [`ToolConnection`]: one
//! discovery operation listing `(tool_name, input_contract)` pairs and one
//! `invoke` operation. The dispatcher is the only caller of `invoke`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{McpResult, ToolErrorKind};

/// A tool as reported by a connection's discovery operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl DiscoveredTool {
    pub fn new(name: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Failure reported by the tool itself (the call reached the tool).
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl InvocationError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify from the message text alone.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ToolErrorKind::classify_message(&message),
            message,
        }
    }
}

/// `{output, error?}` returned by a connection's `invoke`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutput {
    pub output: Value,
    pub error: Option<InvocationError>,
}

impl InvocationOutput {
    pub fn ok(output: Value) -> Self {
        Self {
            output,
            error: None,
        }
    }

    pub fn failed(output: Value, error: InvocationError) -> Self {
        Self {
            output,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// Stable identifier of this connection (the configured server name).
    fn id(&self) -> &str;

    /// List the tools currently exposed, with their input contracts.
    async fn discover(&self) -> McpResult<Vec<DiscoveredTool>>;

    /// Execute one tool. `Err` means the call did not complete at the
    /// transport level; tool-side failures come back in `InvocationOutput::error`.
    async fn invoke(&self, tool_name: &str, arguments: Map<String, Value>)
        -> McpResult<InvocationOutput>;
}

/// Registered tool connections, keyed by connection id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<dyn ToolConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one with the same id.
    pub fn register(&self, connection: Arc<dyn ToolConnection>) {
        let id = connection.id().to_string();
        if self.connections.insert(id.clone(), connection).is_some() {
            debug!(connection = %id, "Replaced existing tool connection");
        } else {
            info!(connection = %id, "Registered tool connection");
        }
    }

    pub fn remove(&self, connection_id: &str) -> Option<Arc<dyn ToolConnection>> {
        self.connections.remove(connection_id).map(|(_, c)| c)
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<dyn ToolConnection>> {
        self.connections.get(connection_id).map(|c| Arc::clone(c.value()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
