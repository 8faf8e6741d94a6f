//! Tool-layer configuration.
//!
//! Defines server connections, schema cache staleness, and dispatch limits.

use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpConfig {
    /// Tool servers connected at startup
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,

    /// Schema cache settings
    #[serde(default)]
    pub cache: SchemaCacheConfig,

    /// Tool dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,

    /// Whether this server is required at startup
    /// - true: startup fails if this server cannot be reached
    /// - false: log a warning and continue (default)
    #[serde(default)]
    pub required: bool,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        envs: HashMap<String, String>,
    },
    Streamable {
        url: String,
        /// Bearer token for Authorization header
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
}

impl fmt::Debug for McpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpTransport::Stdio {
                command,
                args,
                envs,
            } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("envs", &envs.keys().collect::<Vec<_>>())
                .finish(),
            McpTransport::Streamable { url, token } => f
                .debug_struct("Streamable")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaCacheConfig {
    /// Age in seconds after which a cached contract triggers a background refresh
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

impl SchemaCacheConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
        }
    }
}

fn default_staleness_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Per-attempt timeout for a single tool invocation
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Transport-level retry for unreachable connections
    #[serde(default)]
    pub transport_retry: RetryPolicy,
}

impl DispatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            transport_retry: RetryPolicy::default(),
        }
    }
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("server name cannot be empty")]
    EmptyServerName,
    #[error("duplicate server name '{0}'")]
    DuplicateServer(String),
    #[error("server '{0}' has an empty command or url")]
    EmptyEndpoint(String),
    #[error("dispatch.call_timeout_ms must be greater than 0")]
    ZeroCallTimeout,
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),
}

impl McpConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(ConfigValidationError::EmptyServerName);
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigValidationError::DuplicateServer(server.name.clone()));
            }
            let endpoint_empty = match &server.transport {
                McpTransport::Stdio { command, .. } => command.trim().is_empty(),
                McpTransport::Streamable { url, .. } => url.trim().is_empty(),
            };
            if endpoint_empty {
                return Err(ConfigValidationError::EmptyEndpoint(server.name.clone()));
            }
        }
        if self.dispatch.call_timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroCallTimeout);
        }
        self.dispatch
            .transport_retry
            .validate()
            .map_err(ConfigValidationError::InvalidRetry)?;
        Ok(())
    }
}
