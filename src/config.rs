//! Top-level configuration, loaded from YAML.
//!
//! Every field has a default, so a file naming only the model is valid.

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toolloop_mcp::{McpConfig, RetryPolicy};

use crate::adapter::WireVariant;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolLoopConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tools: McpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigValidationError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("gateway.model cannot be empty")]
    EmptyModel,
    #[error("gateway.base_url cannot be empty")]
    EmptyBaseUrl,
    #[error("{0} must be greater than 0")]
    ZeroBound(&'static str),
    #[error("{field} = {value} is outside [0, 2]")]
    TemperatureOutOfRange { field: &'static str, value: f32 },
    #[error("gateway.variant_overrides contains an empty model prefix")]
    EmptyVariantPrefix,
    #[error("invalid gateway.transport_retry: {0}")]
    InvalidRetry(String),
    #[error("tools: {0}")]
    Tools(#[from] toolloop_mcp::ConfigValidationError),
}

impl ToolLoopConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.gateway.validate()?;
        self.orchestrator.validate()?;
        self.tools.validate()?;
        Ok(())
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Inline API key. Prefer `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub default_variant: WireVariant,

    /// Model-name prefix to wire variant. Longest matching prefix wins.
    #[serde(default)]
    pub variant_overrides: BTreeMap<String, WireVariant>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub transport_retry: RetryPolicy,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .field("default_variant", &self.default_variant)
            .field("variant_overrides", &self.variant_overrides)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("transport_retry", &self.transport_retry)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: None,
            model: default_model(),
            default_variant: WireVariant::default(),
            variant_overrides: BTreeMap::new(),
            request_timeout_ms: default_request_timeout_ms(),
            transport_retry: RetryPolicy::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Inline key first, then the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty())
        })
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.model.trim().is_empty() {
            return Err(ConfigValidationError::EmptyModel);
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigValidationError::EmptyBaseUrl);
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroBound("gateway.request_timeout_ms"));
        }
        if self.variant_overrides.keys().any(|k| k.is_empty()) {
            return Err(ConfigValidationError::EmptyVariantPrefix);
        }
        self.transport_retry
            .validate()
            .map_err(ConfigValidationError::InvalidRetry)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Successful tool rounds before the loop is forced to synthesize
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Corrective model calls per turn after retryable tool errors
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_base_temperature")]
    pub base_temperature: f32,

    /// Added to the temperature on every corrective attempt
    #[serde(default = "default_temperature_step")]
    pub temperature_step: f32,

    #[serde(default = "default_max_temperature")]
    pub max_temperature: f32,

    /// Per-attempt timeout of a completion call
    #[serde(default = "default_model_call_timeout_ms")]
    pub model_call_timeout_ms: u64,

    /// Upper bound on one round of concurrent tool dispatch
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Prepended to every request built by `handle_request`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_retry_attempts: default_max_retry_attempts(),
            base_temperature: default_base_temperature(),
            temperature_step: default_temperature_step(),
            max_temperature: default_max_temperature(),
            model_call_timeout_ms: default_model_call_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            system_prompt: None,
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    5
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_base_temperature() -> f32 {
    0.7
}

fn default_temperature_step() -> f32 {
    0.2
}

fn default_max_temperature() -> f32 {
    1.5
}

fn default_model_call_timeout_ms() -> u64 {
    120_000
}

fn default_tool_timeout_ms() -> u64 {
    60_000
}

impl OrchestratorConfig {
    pub fn model_call_timeout(&self) -> Duration {
        Duration::from_millis(self.model_call_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Sampling temperature for a call carrying `bias`.
    pub fn temperature(&self, bias: f32) -> f32 {
        (self.base_temperature + bias).min(self.max_temperature)
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_tool_rounds == 0 {
            return Err(ConfigValidationError::ZeroBound("orchestrator.max_tool_rounds"));
        }
        if self.model_call_timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroBound(
                "orchestrator.model_call_timeout_ms",
            ));
        }
        if self.tool_timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroBound("orchestrator.tool_timeout_ms"));
        }
        for (field, value) in [
            ("orchestrator.base_temperature", self.base_temperature),
            ("orchestrator.temperature_step", self.temperature_step),
            ("orchestrator.max_temperature", self.max_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigValidationError::TemperatureOutOfRange { field, value });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ToolLoopConfig::default();
        assert_eq!(config.orchestrator.max_tool_rounds, 5);
        assert_eq!(config.orchestrator.max_retry_attempts, 3);
        assert_eq!(config.gateway.default_variant, WireVariant::Chat);
        assert_eq!(config.tools.cache.staleness_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml() {
        let config = ToolLoopConfig::from_yaml_str("gateway:\n  model: gpt-4o\n").unwrap();
        assert_eq!(config.gateway.model, "gpt-4o");
        assert_eq!(config.gateway.base_url, "http://localhost:8000");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
gateway:
  base_url: "https://api.example.com"
  api_key: "sk-test"
  model: "o3-mini"
  default_variant: responses
  variant_overrides:
    "llama": chat
  request_timeout_ms: 5000
  transport_retry:
    max_retries: 4
orchestrator:
  max_tool_rounds: 3
  base_temperature: 0.2
  system_prompt: "You are terse."
tools:
  servers:
    - name: "docs"
      protocol: streamable
      url: "https://tools.example.com/mcp"
logging:
  level: debug
  json: true
"#;
        let config = ToolLoopConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.gateway.default_variant, WireVariant::Responses);
        assert_eq!(
            config.gateway.variant_overrides.get("llama"),
            Some(&WireVariant::Chat)
        );
        assert_eq!(config.gateway.transport_retry.max_retries, 4);
        assert_eq!(config.orchestrator.max_tool_rounds, 3);
        assert_eq!(config.orchestrator.max_retry_attempts, 3);
        assert_eq!(config.tools.servers.len(), 1);
        assert!(config.logging.json);
        assert_eq!(config.gateway.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_rejects_zero_rounds() {
        let err =
            ToolLoopConfig::from_yaml_str("orchestrator:\n  max_tool_rounds: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(ConfigValidationError::ZeroBound("orchestrator.max_tool_rounds"))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let mut config = ToolLoopConfig::default();
        config.orchestrator.base_temperature = 2.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::TemperatureOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = ToolLoopConfig::default();
        config.gateway.transport_retry = RetryPolicy {
            max_retries: 1,
            initial_backoff_ms: 500,
            max_backoff_ms: 100,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidRetry(_))
        ));
    }

    #[test]
    fn test_temperature_is_clamped() {
        let config = OrchestratorConfig::default();
        assert!((config.temperature(0.0) - 0.7).abs() < 1e-6);
        assert!((config.temperature(0.4) - 1.1).abs() < 1e-6);
        assert!((config.temperature(5.0) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = GatewayConfig {
            api_key: Some("sk-secret".into()),
            ..GatewayConfig::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
