//! Completion Gateway.
//!
//! One call against one backend: frame the history for the model's wire
//! variant, advertise tools when enabled, retry transport failures, and hand
//! back either plain content or tool requests.

mod http;

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use toolloop_mcp::{retry_transient, RetryPolicy, SchemaCache};
use toolloop_protocol::{generate_id, has_tool_structure, validate_pairing, Message, ToolCall};
use tracing::{debug, error, warn};

pub use http::HttpCompletionBackend;

use crate::{
    adapter::{build_request, parse_completion, WireCompletion, WireRequest, WireVariant},
    config::GatewayConfig,
    error::GatewayError,
};

/// Sends one framed request to a completion backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &WireRequest) -> Result<WireCompletion, GatewayError>;
}

/// Outcome of one completion call.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResult {
    Content(String),
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// Picks the wire variant for a model name by longest matching prefix.
#[derive(Debug, Clone, Default)]
pub struct VariantSelector {
    default: WireVariant,
    overrides: Vec<(String, WireVariant)>,
}

impl VariantSelector {
    pub fn new(
        default: WireVariant,
        overrides: impl IntoIterator<Item = (String, WireVariant)>,
    ) -> Self {
        let mut overrides: Vec<_> = overrides.into_iter().collect();
        overrides.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { default, overrides }
    }

    pub fn select(&self, model: &str) -> WireVariant {
        self.overrides
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map_or(self.default, |(_, variant)| *variant)
    }
}

pub struct CompletionGateway {
    backend: Arc<dyn CompletionBackend>,
    schemas: Arc<SchemaCache>,
    model: String,
    selector: VariantSelector,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl CompletionGateway {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        schemas: Arc<SchemaCache>,
        config: &GatewayConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            schemas,
            model: config.model.clone(),
            selector: VariantSelector::new(
                config.default_variant,
                config
                    .variant_overrides
                    .iter()
                    .map(|(prefix, variant)| (prefix.clone(), *variant)),
            ),
            retry: config.transport_retry.clone(),
            call_timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn variant(&self) -> WireVariant {
        self.selector.select(&self.model)
    }

    /// Issue one completion call.
    ///
    /// With `tools_enabled == false` no tool is advertised, any history still
    /// carrying tool structure is refused before sending, and a response that
    /// requests tools anyway is rejected.
    pub async fn call(
        &self,
        history: &[Message],
        tools_enabled: bool,
        temperature: f32,
    ) -> Result<GatewayResult, GatewayError> {
        if let Err(e) = validate_pairing(history) {
            error!(model = %self.model, error = %e, "Refusing to send unpaired history");
            return Err(e.into());
        }
        if !tools_enabled && has_tool_structure(history) {
            error!(
                model = %self.model,
                "Refusing to send tool structure to a tool-disabled call"
            );
            return Err(GatewayError::ToolStructureWithToolsDisabled);
        }

        let tools = if tools_enabled {
            self.schemas.tool_definitions()
        } else {
            Vec::new()
        };
        let variant = self.variant();
        let request = build_request(variant, &self.model, history, &tools, temperature)?;

        debug!(
            model = %self.model,
            variant = %variant,
            messages = history.len(),
            tools = request.tool_count(),
            temperature,
            "Calling completion backend"
        );

        let completion = self.send(&request).await.inspect_err(|e| {
            if e.is_structural() {
                error!(
                    model = %self.model,
                    variant = %variant,
                    error = %e,
                    "Backend rejected message sequence"
                );
            }
        })?;
        let parsed = parse_completion(completion)?;

        if !tools_enabled && !parsed.tool_calls.is_empty() {
            warn!(
                model = %self.model,
                count = parsed.tool_calls.len(),
                "Backend requested tools on a tool-disabled call"
            );
            return Err(GatewayError::UnexpectedToolCalls {
                count: parsed.tool_calls.len(),
            });
        }

        if parsed.tool_calls.is_empty() {
            return Ok(GatewayResult::Content(parsed.content.unwrap_or_default()));
        }
        Ok(GatewayResult::ToolCalls {
            content: parsed.content.filter(|c| !c.is_empty()),
            calls: normalize_call_ids(history, parsed.tool_calls),
        })
    }

    async fn send(&self, request: &WireRequest) -> Result<WireCompletion, GatewayError> {
        let timeout = self.call_timeout;
        let backend = &self.backend;
        retry_transient(&self.retry, "completion", GatewayError::is_transient, || async move {
            tokio::time::timeout(timeout, backend.complete(request))
                .await
                .unwrap_or_else(|_| Err(GatewayError::Timeout(timeout)))
        })
        .await
    }
}

/// Give fresh ids to calls whose id is blank or already used in this turn.
pub(crate) fn normalize_call_ids(history: &[Message], calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen: HashSet<String> = history
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
        .collect();

    calls
        .into_iter()
        .map(|mut call| {
            if call.id.trim().is_empty() || seen.contains(&call.id) {
                let fresh = generate_id("call");
                debug!(
                    tool = %call.tool_name,
                    old_id = %call.id,
                    call_id = %fresh,
                    "Reassigned tool call id"
                );
                call.id = fresh;
            }
            seen.insert(call.id.clone());
            call
        })
        .collect()
}
