//! Common test utilities for tool loop integration tests

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use toolloop::{
    config::{GatewayConfig, OrchestratorConfig},
    CompletionBackend, CompletionGateway, GatewayError, Orchestrator, WireCompletion, WireRequest,
};
use toolloop_mcp::{
    DiscoveredTool, DispatchConfig, InvocationError, InvocationOutput, McpConfig, McpResult,
    RetryPolicy, SchemaCache, ToolConnection, ToolDispatcher, ToolErrorKind, ToolRuntime,
};
use toolloop_protocol::{chat::ChatCompletionResponse, Message};

// ============================================================================
// Scripted completion backend
// ============================================================================

/// Completion backend replaying a fixed script and recording every request.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<WireCompletion, GatewayError>>>,
    requests: Mutex<Vec<WireRequest>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<WireCompletion, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    /// Backend that waits `delay` before answering each request.
    pub fn slow(script: Vec<Result<WireCompletion, GatewayError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &WireRequest) -> Result<WireCompletion, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(GatewayError::Decode("script exhausted".into())))
    }
}

/// Chat completion answering with plain text.
pub fn text(content: &str) -> Result<WireCompletion, GatewayError> {
    chat(json!({"role": "assistant", "content": content}))
}

/// Chat completion requesting the given `(id, tool, arguments)` calls.
pub fn tool_calls(calls: &[(&str, &str, Value)]) -> Result<WireCompletion, GatewayError> {
    let calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, arguments)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": arguments.to_string()}
            })
        })
        .collect();
    chat(json!({"role": "assistant", "content": null, "tool_calls": calls}))
}

fn chat(message: Value) -> Result<WireCompletion, GatewayError> {
    let response: ChatCompletionResponse = serde_json::from_value(json!({
        "id": "chatcmpl-test",
        "choices": [{"index": 0, "message": message, "finish_reason": "stop"}]
    }))
    .unwrap();
    Ok(WireCompletion::Chat(response))
}

/// Canonical messages sent in a recorded chat request.
pub fn sent_messages(request: &WireRequest) -> Vec<Value> {
    match request {
        WireRequest::Chat(chat) => chat
            .messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap())
            .collect(),
        WireRequest::Responses(responses) => responses
            .input
            .iter()
            .map(|m| serde_json::to_value(m).unwrap())
            .collect(),
    }
}

// ============================================================================
// In-memory tool connections
// ============================================================================

pub type Handler =
    Arc<dyn Fn(&str, &Map<String, Value>) -> McpResult<InvocationOutput> + Send + Sync>;

/// Tool connection whose tools and behavior are set by the test.
pub struct InMemoryConnection {
    id: String,
    tools: Mutex<Vec<DiscoveredTool>>,
    handler: Handler,
    delay: Option<Duration>,
    /// Invocations answered only after `delay`, counted from the first.
    slow_invocations: usize,
    invocations: AtomicUsize,
    completed: AtomicUsize,
    discoveries: AtomicUsize,
}

impl InMemoryConnection {
    pub fn new(id: &str, tools: Vec<DiscoveredTool>, handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            tools: Mutex::new(tools),
            handler,
            delay: None,
            slow_invocations: 0,
            invocations: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            discoveries: AtomicUsize::new(0),
        })
    }

    pub fn slow(
        id: &str,
        tools: Vec<DiscoveredTool>,
        handler: Handler,
        delay: Duration,
    ) -> Arc<Self> {
        Self::slow_for(id, tools, handler, delay, usize::MAX)
    }

    /// Connection whose first `count` invocations wait `delay`.
    pub fn slow_for(
        id: &str,
        tools: Vec<DiscoveredTool>,
        handler: Handler,
        delay: Duration,
        count: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            tools: Mutex::new(tools),
            handler,
            delay: Some(delay),
            slow_invocations: count,
            invocations: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            discoveries: AtomicUsize::new(0),
        })
    }

    /// Replace what the next discovery returns.
    pub fn set_tools(&self, tools: Vec<DiscoveredTool>) {
        *self.tools.lock().unwrap() = tools;
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolConnection for InMemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn discover(&self) -> McpResult<Vec<DiscoveredTool>> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<InvocationOutput> {
        let seen = self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay.filter(|_| seen < self.slow_invocations) {
            tokio::time::sleep(delay).await;
        }
        let result = (self.handler)(tool_name, &arguments);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Object contract with the given required string fields and no extras.
pub fn contract(required: &[&str]) -> Value {
    let properties: Map<String, Value> = required
        .iter()
        .map(|field| (field.to_string(), json!({"type": "string"})))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

pub fn weather_tool(field: &str) -> DiscoveredTool {
    DiscoveredTool::new("weather", contract(&[field])).with_description("Current weather")
}

/// Handler echoing a fixed forecast for `weather` and rejecting anything
/// without a `location` argument.
pub fn weather_handler() -> Handler {
    Arc::new(
        |_tool: &str, arguments: &Map<String, Value>| match arguments.get("location") {
            Some(location) => Ok(InvocationOutput::ok(
                json!({"location": location, "forecast": "light rain", "temp_c": 7}),
            )),
            None => Ok(InvocationOutput::failed(
                Value::Null,
                InvocationError::new(
                    ToolErrorKind::InvalidArguments,
                    "missing required field 'location'",
                ),
            )),
        },
    )
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub backend: Arc<ScriptedBackend>,
    pub runtime: ToolRuntime,
}

impl Harness {
    pub fn cache(&self) -> &Arc<SchemaCache> {
        self.runtime.cache()
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        self.runtime.dispatcher()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
    }
}

pub fn fast_config() -> (GatewayConfig, OrchestratorConfig, McpConfig) {
    let gateway = GatewayConfig {
        model: "test-model".into(),
        transport_retry: fast_retry(),
        ..GatewayConfig::default()
    };
    let orchestrator = OrchestratorConfig {
        model_call_timeout_ms: 5_000,
        tool_timeout_ms: 5_000,
        ..OrchestratorConfig::default()
    };
    let tools = McpConfig {
        dispatch: DispatchConfig {
            call_timeout_ms: 5_000,
            transport_retry: fast_retry(),
        },
        ..McpConfig::default()
    };
    (gateway, orchestrator, tools)
}

/// Build an orchestrator over `backend` with `connections` registered.
pub async fn harness_with(
    backend: Arc<ScriptedBackend>,
    connections: Vec<Arc<InMemoryConnection>>,
    orchestrator_config: OrchestratorConfig,
) -> Harness {
    let (gateway_config, _, tools) = fast_config();
    let runtime = ToolRuntime::new(&tools);
    for connection in connections {
        runtime.register(connection).await.unwrap();
    }
    let gateway = CompletionGateway::new(
        backend.clone(),
        Arc::clone(runtime.cache()),
        &gateway_config,
        orchestrator_config.model_call_timeout(),
    );
    let orchestrator = Orchestrator::new(
        gateway,
        runtime.dispatcher().clone(),
        orchestrator_config,
    );
    Harness {
        orchestrator,
        backend,
        runtime,
    }
}

pub async fn harness(
    script: Vec<Result<WireCompletion, GatewayError>>,
    connections: Vec<Arc<InMemoryConnection>>,
) -> Harness {
    let (_, orchestrator, _) = fast_config();
    harness_with(ScriptedBackend::new(script), connections, orchestrator).await
}

pub fn user_history(text: &str) -> Vec<Message> {
    vec![Message::system("You are a helpful assistant."), Message::user(text)]
}
