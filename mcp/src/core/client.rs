//! MCP server connection backed by the rmcp client.

use std::{borrow::Cow, time::Duration};

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, ErrorCode},
    service::{RunningService, ServiceError},
    transport::{
        streamable_http_client::StreamableHttpClientTransportConfig, ConfigureCommandExt,
        StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    config::{McpServerConfig, McpTransport},
    connection::{DiscoveredTool, InvocationError, InvocationOutput, ToolConnection},
};
use crate::error::{McpError, McpResult};

type McpClient = RunningService<RoleClient, ()>;

pub struct RmcpConnection {
    id: String,
    client: McpClient,
}

impl RmcpConnection {
    /// Spawn or dial the configured server and complete the MCP handshake.
    pub async fn connect(config: &McpServerConfig) -> McpResult<Self> {
        let client = match &config.transport {
            McpTransport::Stdio {
                command,
                args,
                envs,
            } => {
                let transport = TokioChildProcess::new(
                    tokio::process::Command::new(command).configure(|cmd| {
                        cmd.args(args)
                            .envs(envs.iter())
                            .stderr(std::process::Stdio::inherit());
                    }),
                )
                .map_err(|e| McpError::Transport(format!("create stdio transport: {e}")))?;

                ().serve(transport).await.map_err(|e| {
                    McpError::ConnectionFailed(format!("initialize stdio client: {e}"))
                })?
            }
            McpTransport::Streamable { url, token } => {
                let http_client = build_http_client(token.as_deref())?;
                let cfg = StreamableHttpClientTransportConfig::with_uri(url.as_str());
                let transport = StreamableHttpClientTransport::with_client(http_client, cfg);

                ().serve(transport).await.map_err(|e| {
                    McpError::ConnectionFailed(format!("initialize streamable client: {e}"))
                })?
            }
        };

        info!(connection = %config.name, "Connected to MCP server");
        Ok(Self {
            id: config.name.clone(),
            client,
        })
    }

    /// Close the session.
    pub async fn shutdown(self) {
        if let Err(e) = self.client.cancel().await {
            debug!(connection = %self.id, error = %e, "MCP session did not close cleanly");
        }
    }
}

#[async_trait]
impl ToolConnection for RmcpConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn discover(&self) -> McpResult<Vec<DiscoveredTool>> {
        let tools = self
            .client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| McpError::Discovery {
                connection: self.id.clone(),
                message: e.to_string(),
            })?;

        Ok(tools
            .into_iter()
            .map(|tool| DiscoveredTool {
                name: tool.name.into_owned(),
                description: tool.description.map(Cow::into_owned),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<InvocationOutput> {
        let request = CallToolRequestParam {
            name: Cow::Owned(tool_name.to_string()),
            arguments: Some(arguments),
        };

        let result = self
            .client
            .peer()
            .call_tool(request)
            .await
            .map_err(map_service_error)?;

        Ok(invocation_output(result))
    }
}

fn build_http_client(token: Option<&str>) -> McpResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|e| McpError::Transport(format!("auth token: {e}")))?,
        );
    }

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .default_headers(headers)
        .build()
        .map_err(|e| McpError::Transport(format!("build HTTP client: {e}")))
}

fn map_service_error(err: ServiceError) -> McpError {
    match err {
        ServiceError::McpError(data) if data.code == ErrorCode::INVALID_PARAMS => {
            McpError::InvalidArguments(data.message.into_owned())
        }
        ServiceError::McpError(data) if data.code == ErrorCode::METHOD_NOT_FOUND => {
            McpError::ToolNotFound(data.message.into_owned())
        }
        ServiceError::McpError(data) => McpError::ToolExecution(data.message.into_owned()),
        ServiceError::Timeout { timeout } => McpError::Timeout(timeout),
        ServiceError::TransportClosed | ServiceError::TransportSend(_) => {
            McpError::Transport(err.to_string())
        }
        other => McpError::ToolExecution(other.to_string()),
    }
}

fn invocation_output(result: CallToolResult) -> InvocationOutput {
    let content = serde_json::to_value(&result.content).unwrap_or(Value::Null);
    let text = content_text(&content);
    let output = match result.structured_content {
        Some(structured) => structured,
        None if !text.is_empty() => Value::String(text.clone()),
        None => content,
    };

    if result.is_error.unwrap_or(false) {
        let message = if text.is_empty() {
            "tool reported an error".to_string()
        } else {
            text
        };
        InvocationOutput::failed(output, InvocationError::from_message(message))
    } else {
        InvocationOutput::ok(output)
    }
}

/// Concatenated text of all `text` content items.
fn content_text(content: &Value) -> String {
    content
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
