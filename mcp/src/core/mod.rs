//! Tool connections, dispatch and tool-layer configuration.

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod metrics;
pub mod retry;
pub mod runtime;

pub use client::RmcpConnection;
pub use config::{
    ConfigValidationError, DispatchConfig, McpConfig, McpServerConfig, McpTransport,
    SchemaCacheConfig,
};
pub use connection::{
    ConnectionRegistry, DiscoveredTool, InvocationError, InvocationOutput, ToolConnection,
};
pub use dispatcher::ToolDispatcher;
pub use metrics::{DispatcherMetrics, DispatcherSnapshot, LatencySnapshot};
pub use retry::{retry_transient, RetryPolicy};
pub use runtime::ToolRuntime;
