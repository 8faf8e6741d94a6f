//! External tool layer for the tool-calling loop.
//!
//! ## Modules
//!
//! - [`core`]: connections (rmcp-backed or custom), dispatcher, config, retry
//! - [`inventory`]: schema cache of tool input contracts
//! - [`validation`]: argument checks against a cached contract

pub mod core;
pub mod error;
pub mod inventory;
pub mod validation;

pub use core::{
    config, retry, retry_transient, ConfigValidationError, ConnectionRegistry, DiscoveredTool,
    DispatchConfig, DispatcherMetrics, DispatcherSnapshot, InvocationError, InvocationOutput,
    LatencySnapshot, McpConfig, McpServerConfig, McpTransport, RetryPolicy, RmcpConnection,
    SchemaCacheConfig, ToolConnection, ToolDispatcher, ToolRuntime,
};

pub use error::{McpError, McpResult, ToolErrorKind};
pub use inventory::{SchemaCache, SchemaKey, ToolSchema};
pub use validation::{
    coerce_argument_types, validate_arguments, CompiledContract, ContractViolation, InvalidValue,
    TypeMismatch,
};
