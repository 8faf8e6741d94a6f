//! Tool-calling orchestration core.
//!
//! ## Modules
//!
//! - [`adapter`]: canonical history to and from the chat and responses wire formats
//! - [`gateway`]: one completion call, with transport retry and structural checks
//! - [`orchestrator`]: the per-turn state machine driving model calls and tools
//! - [`sanitizer`]: tool-free history for the final synthesis call
//! - [`config`], [`logging`], [`error`]

pub mod adapter;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod orchestrator;
pub mod sanitizer;

pub use adapter::{WireCompletion, WireMessages, WireRequest, WireVariant};
pub use config::{ConfigError, GatewayConfig, LoggingConfig, OrchestratorConfig, ToolLoopConfig};
pub use error::{AdapterError, GatewayError, OrchestratorError};
pub use gateway::{
    CompletionBackend, CompletionGateway, GatewayResult, HttpCompletionBackend, VariantSelector,
};
pub use orchestrator::{Orchestrator, TurnReport, TurnState};
pub use sanitizer::sanitize;
pub use tokio_util::sync::CancellationToken;
