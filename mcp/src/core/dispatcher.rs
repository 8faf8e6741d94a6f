//! Tool Execution Dispatcher.
//!
//! Resolves the cached contract for each requested tool, checks the
//! arguments, invokes the owning connection and classifies the outcome as
//! success, retryable error or fatal error.

use std::{sync::Arc, time::Instant};

use futures::future::join_all;
use serde_json::{Map, Value};
use toolloop_protocol::{ToolCall, ToolResult};
use tracing::{debug, error, info, warn};

use super::{
    config::DispatchConfig,
    connection::{InvocationOutput, ToolConnection},
    metrics::{DispatcherMetrics, DispatcherSnapshot},
    retry::retry_transient,
};
use crate::{
    error::{McpError, ToolErrorKind},
    inventory::{SchemaCache, SchemaKey, ToolSchema},
    validation::coerce_argument_types,
};

#[derive(Clone)]
pub struct ToolDispatcher {
    cache: Arc<SchemaCache>,
    config: DispatchConfig,
    metrics: Arc<DispatcherMetrics>,
}

impl ToolDispatcher {
    pub fn new(cache: Arc<SchemaCache>, config: DispatchConfig) -> Self {
        Self {
            cache,
            config,
            metrics: Arc::new(DispatcherMetrics::new()),
        }
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<DispatcherMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        self.metrics.snapshot()
    }

    /// Execute one tool call and classify the result. Never fails: every
    /// problem is folded into the returned [`ToolResult`].
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.metrics.record_call_start();
        let started = Instant::now();

        let result = self.dispatch(call).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .record_call_end(&call.tool_name, result.outcome, elapsed_ms);

        if result.is_success() {
            debug!(
                tool = %call.tool_name,
                call_id = %call.id,
                duration_ms = elapsed_ms,
                "Tool call succeeded"
            );
        } else {
            warn!(
                tool = %call.tool_name,
                call_id = %call.id,
                outcome = ?result.outcome,
                detail = result.error_detail.as_deref().unwrap_or_default(),
                "Tool call failed"
            );
        }
        result
    }

    /// Execute every call concurrently and return results in call order.
    ///
    /// Waits for all dispatches even when one of them fails fatally. Each call
    /// runs on its own task, so dropping this future abandons the results
    /// while letting in-flight invocations finish.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.execute(&call).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(calls)
            .map(|(joined, call)| {
                joined.unwrap_or_else(|e| {
                    error!(
                        tool = %call.tool_name,
                        call_id = %call.id,
                        error = %e,
                        "Tool task aborted"
                    );
                    let detail = format!("tool task for '{}' aborted: {e}", call.tool_name);
                    ToolResult::fatal(call, detail)
                })
            })
            .collect()
    }

    /// Synchronously refresh every connection with a suspect contract.
    pub async fn refresh_suspect(&self) -> usize {
        let refreshed = self.cache.refresh_suspect().await;
        for _ in 0..refreshed {
            self.metrics.record_forced_refresh();
        }
        refreshed
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if let Some(raw) = &call.raw_arguments {
            return ToolResult::retryable(
                call,
                format!(
                    "arguments for tool '{}' must be a JSON object, got: {raw}",
                    call.tool_name
                ),
            );
        }

        let schema = match self.resolve_schema(&call.tool_name).await {
            Some(schema) => schema,
            None => return self.unknown_tool(call),
        };
        let key = schema.key();

        let mut arguments = call.arguments.clone();
        coerce_argument_types(&mut arguments, &schema.input_contract);
        if let Err(violation) = schema.validate_arguments(&arguments) {
            self.cache.mark_suspect(&key);
            self.metrics.record_contract_mismatch();
            return ToolResult::retryable(
                call,
                format!(
                    "arguments do not match the input contract of '{}': {violation}",
                    call.tool_name
                ),
            );
        }

        let Some(connection) = self.cache.connections().get(&schema.connection_id) else {
            return ToolResult::fatal(
                call,
                format!(
                    "connection '{}' for tool '{}' is not available",
                    schema.connection_id, call.tool_name
                ),
            );
        };

        match self.invoke(connection, &call.tool_name, arguments).await {
            Ok(InvocationOutput {
                output,
                error: None,
            }) => ToolResult::success(call, output),
            Ok(InvocationOutput {
                error: Some(e), ..
            }) => self.classify(call, &key, e.kind, &e.message),
            Err(e) if e.is_transient() => {
                self.metrics.record_transport_failure();
                ToolResult::retryable(
                    call,
                    format!("tool '{}' is unreachable: {e}", call.tool_name),
                )
            }
            Err(e) => self.classify(call, &key, e.tool_error_kind(), &e.to_string()),
        }
    }

    /// Current schema for `tool_name`, refreshing first when it is suspect and
    /// scheduling a background refresh when it is stale.
    async fn resolve_schema(&self, tool_name: &str) -> Option<Arc<ToolSchema>> {
        let schema = self.cache.get_schema(tool_name)?;

        if self.cache.is_suspect(&schema.key()) {
            info!(
                tool = %tool_name,
                connection = %schema.connection_id,
                "Forcing refresh of suspect tool schema"
            );
            self.metrics.record_forced_refresh();
            if let Err(e) = self.cache.refresh(&schema.connection_id).await {
                warn!(
                    connection = %schema.connection_id,
                    error = %e,
                    "Forced refresh failed, using cached schema"
                );
                return Some(schema);
            }
            return self.cache.get_schema(tool_name);
        }

        if self.cache.is_stale(&schema) && self.cache.spawn_refresh(&schema.connection_id) {
            self.metrics.record_background_refresh();
        }
        Some(schema)
    }

    fn unknown_tool(&self, call: &ToolCall) -> ToolResult {
        for id in self.cache.connections().ids() {
            if self.cache.spawn_refresh(&id) {
                self.metrics.record_background_refresh();
            }
        }

        let available: Vec<String> = self
            .cache
            .tool_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        ToolResult::retryable(
            call,
            format!(
                "unknown tool '{}'; available tools: {}",
                call.tool_name,
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            ),
        )
    }

    async fn invoke(
        &self,
        connection: Arc<dyn ToolConnection>,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<InvocationOutput, McpError> {
        let timeout = self.config.call_timeout();
        retry_transient(
            &self.config.transport_retry,
            tool_name,
            McpError::is_transient,
            || {
                let connection = Arc::clone(&connection);
                let arguments = arguments.clone();
                async move {
                    tokio::time::timeout(timeout, connection.invoke(tool_name, arguments))
                        .await
                        .unwrap_or_else(|_| Err(McpError::Timeout(timeout)))
                }
            },
        )
        .await
    }

    fn classify(
        &self,
        call: &ToolCall,
        key: &SchemaKey,
        kind: ToolErrorKind,
        message: &str,
    ) -> ToolResult {
        if kind.implicates_contract() {
            self.cache.mark_suspect(key);
            self.metrics.record_contract_mismatch();
        }
        let detail = format!("{kind}: {message}");
        if kind.is_retryable() {
            ToolResult::retryable(call, detail)
        } else {
            ToolResult::fatal(call, detail)
        }
    }
}
