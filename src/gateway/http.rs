//! HTTP completion backend over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::CompletionBackend;
use crate::{
    adapter::{WireCompletion, WireRequest},
    config::GatewayConfig,
    error::GatewayError,
};

/// Substrings of a 400 body that identify a rejected message sequence.
const STRUCTURAL_MARKERS: &[&str] = &[
    "tool_call_id",
    "tool_calls",
    "function_call_output",
    "no tool output found",
    "must be followed by tool messages",
    "messages with role 'tool'",
    "invalid message sequence",
];

pub struct HttpCompletionBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpCompletionBackend {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Transport(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            timeout,
        })
    }

    fn endpoint(&self, request: &WireRequest) -> String {
        match request {
            WireRequest::Chat(_) => format!("{}/v1/chat/completions", self.base_url),
            WireRequest::Responses(_) => format!("{}/v1/responses", self.base_url),
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Transport(e.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, request: &WireRequest) -> Result<WireCompletion, GatewayError> {
        let url = self.endpoint(request);
        let mut builder = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Completion backend responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        Ok(match request {
            WireRequest::Chat(_) => WireCompletion::Chat(self.decode(response).await?),
            WireRequest::Responses(_) => WireCompletion::Responses(self.decode(response).await?),
        })
    }
}

fn classify_status(status: StatusCode, body: String) -> GatewayError {
    if status == StatusCode::BAD_REQUEST && is_structural_rejection(&body) {
        GatewayError::StructuralRejection(body)
    } else {
        GatewayError::Upstream {
            status: status.as_u16(),
            body,
        }
    }
}

fn is_structural_rejection(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    STRUCTURAL_MARKERS.iter().any(|marker| lower.contains(marker))
}
