//! Orchestrator state machine.
//!
//! One [`Orchestrator::run_turn`] drives a single conversational turn:
//!
//! ```text
//! AWAITING_MODEL -> EXECUTING_TOOLS -> AWAITING_MODEL        (all tools succeeded)
//!                                   -> RETRYING -> AWAITING_MODEL  (corrective call)
//!                                               -> SYNTHESIZING    (budget spent)
//!                                   -> SYNTHESIZING          (round bound reached)
//!                                   -> FAILED                (fatal tool error)
//! AWAITING_MODEL -> DONE                                     (plain content)
//! SYNTHESIZING   -> DONE
//! ```
//!
//! The durable history always keeps assistant requests paired with their
//! tool answers. Corrective calls are made from a separate working copy
//! that has been sanitized and carries a guidance message.

mod state;

use std::{future::Future, sync::Arc, time::Instant};

use serde_json::json;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use toolloop_mcp::{retry_transient, ToolDispatcher, ToolRuntime};
use toolloop_protocol::{
    agent::{AgentResponse, IncomingRequest},
    Message, ToolCall, ToolOutcome, ToolResult,
};
use tracing::{debug, error, info, warn};
use validator::Validate;

pub use state::{ObservedError, RetryState, Transition, TurnReport, TurnState};

use crate::{
    adapter::to_canonical,
    config::{OrchestratorConfig, ToolLoopConfig},
    error::{GatewayError, OrchestratorError},
    gateway::{normalize_call_ids, CompletionBackend, CompletionGateway, GatewayResult},
    sanitizer::sanitize,
};

pub struct Orchestrator {
    gateway: CompletionGateway,
    dispatcher: ToolDispatcher,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        gateway: CompletionGateway,
        dispatcher: ToolDispatcher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            config,
        }
    }

    /// Wire an orchestrator to `backend` and the tools loaded in `runtime`.
    pub fn from_config(
        config: &ToolLoopConfig,
        backend: Arc<dyn CompletionBackend>,
        runtime: &ToolRuntime,
    ) -> Self {
        let gateway = CompletionGateway::new(
            backend,
            Arc::clone(runtime.cache()),
            &config.gateway,
            config.orchestrator.model_call_timeout(),
        );
        Self::new(
            gateway,
            runtime.dispatcher().clone(),
            config.orchestrator.clone(),
        )
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gateway(&self) -> &CompletionGateway {
        &self.gateway
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Run one turn over `history` until it is `DONE` or `FAILED`.
    pub async fn run_turn(&self, history: Vec<Message>, cancel: &CancellationToken) -> TurnReport {
        let mut turn = Turn::new(history);
        match self.drive(&mut turn, cancel).await {
            Ok(answer) => turn.finish(answer),
            Err(e) => turn.fail(e),
        }
        turn.report
    }

    async fn drive(
        &self,
        turn: &mut Turn,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let mut retry: Option<RetryState> = None;

        loop {
            // AWAITING_MODEL
            let bias = retry.as_ref().map_or(0.0, |r| r.temperature_bias);
            let result = self
                .call_model(turn, true, self.config.temperature(bias), cancel)
                .await?;
            let (content, calls) = match result {
                GatewayResult::Content(text) => return Ok(text),
                GatewayResult::ToolCalls { content, calls } => {
                    // ids must stay unique across the durable history, which
                    // may hold rounds the working copy no longer shows
                    (content, normalize_call_ids(&turn.report.history, calls))
                }
            };

            // EXECUTING_TOOLS
            turn.advance(TurnState::ExecutingTools);
            let results = self.execute_tools(&calls, cancel).await?;
            let attempt = retry.as_ref().map_or(0, |r| r.attempt_count);
            let request = Message::assistant_tool_calls(content, calls);
            let round = turn.record_round(request, &results, attempt);

            if let Some(fatal) = results.iter().find(|r| r.outcome == ToolOutcome::FatalError) {
                error!(
                    tool = %fatal.tool_name,
                    call_id = %fatal.call_id,
                    detail = fatal.error_detail.as_deref().unwrap_or_default(),
                    "Fatal tool error, abandoning turn"
                );
                return Err(OrchestratorError::FatalTool {
                    call_id: fatal.call_id.clone(),
                    tool_name: fatal.tool_name.clone(),
                    detail: fatal.error_detail.clone().unwrap_or_default(),
                });
            }

            if results.iter().any(|r| r.outcome == ToolOutcome::RetryableError) {
                turn.advance(TurnState::Retrying);
                if turn.report.corrective_calls >= self.config.max_retry_attempts {
                    warn!(
                        corrective_calls = turn.report.corrective_calls,
                        "Retry budget spent, synthesizing without tools"
                    );
                    break;
                }

                let state = retry.get_or_insert_with(RetryState::default);
                state
                    .observed_errors
                    .extend(results.iter().filter_map(|r| ObservedError::from_result(r, attempt)));
                state.attempt_count += 1;
                state.temperature_bias += self.config.temperature_step;

                self.dispatcher.refresh_suspect().await;
                state.guidance_message = Some(self.guidance(state.errors_in(attempt)));
                warn!(
                    attempt = state.attempt_count,
                    temperature = self.config.temperature(state.temperature_bias),
                    failed = state.errors_in(attempt).count(),
                    "Retryable tool errors, issuing corrective call"
                );

                turn.context = sanitize(&turn.report.history);
                turn.context
                    .extend(state.guidance_message.iter().cloned().map(Message::user));
                turn.report.corrective_calls += 1;
                turn.advance(TurnState::AwaitingModel);
                continue;
            }

            retry = None;
            turn.context.extend(round);
            turn.report.tool_rounds += 1;
            if turn.report.tool_rounds >= self.config.max_tool_rounds {
                info!(
                    rounds = turn.report.tool_rounds,
                    "Tool round bound reached, synthesizing"
                );
                break;
            }
            turn.advance(TurnState::AwaitingModel);
        }

        // SYNTHESIZING
        turn.advance(TurnState::Synthesizing);
        turn.context = sanitize(&turn.report.history);
        match self
            .call_model(turn, false, self.config.base_temperature, cancel)
            .await?
        {
            GatewayResult::Content(text) => {
                turn.report.synthesized = true;
                Ok(text)
            }
            GatewayResult::ToolCalls { calls, .. } => Err(OrchestratorError::Gateway(
                GatewayError::UnexpectedToolCalls { count: calls.len() },
            )),
        }
    }

    async fn call_model(
        &self,
        turn: &mut Turn,
        tools_enabled: bool,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<GatewayResult, OrchestratorError> {
        turn.report.model_calls += 1;
        debug!(
            call = turn.report.model_calls,
            tools_enabled,
            temperature,
            messages = turn.context.len(),
            "Awaiting model"
        );
        let call = self.gateway.call(&turn.context, tools_enabled, temperature);
        Ok(cancellable(cancel, "awaiting model", call).await??)
    }

    /// Dispatch every call and wait for all results.
    ///
    /// A round that outlives the tool timeout is a transport failure: it is
    /// dispatched again under the dispatch retry policy. Only when that is
    /// spent does every call get a retryable error. Abandoned attempts run to
    /// completion and their results are dropped.
    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolResult>, OrchestratorError> {
        let timeout = self.config.tool_timeout();
        let policy = &self.dispatcher.config().transport_retry;
        let fan_out = retry_transient(
            policy,
            "tool dispatch",
            |_: &Elapsed| true,
            || tokio::time::timeout(timeout, self.dispatcher.execute_all(calls)),
        );
        match cancellable(cancel, "executing tools", fan_out).await? {
            Ok(results) => Ok(results),
            Err(_) => {
                let attempts = policy.max_retries + 1;
                warn!(
                    calls = calls.len(),
                    timeout_ms = timeout.as_millis() as u64,
                    attempts,
                    "Tool dispatch timed out"
                );
                Ok(calls
                    .iter()
                    .map(|call| {
                        let detail = format!(
                            "tool dispatch timed out after {timeout:?} ({attempts} attempts)"
                        );
                        ToolResult::retryable(call, detail)
                    })
                    .collect())
            }
        }
    }

    /// Corrective message naming each failed call and the contract it must
    /// follow now.
    fn guidance<'a>(&self, errors: impl Iterator<Item = &'a ObservedError>) -> String {
        let mut text = String::from(
            "Your previous tool request could not be completed and has been discarded.\n",
        );
        let mut described: Vec<&str> = Vec::new();
        for error in errors {
            let detail = if error.detail.is_empty() {
                "unknown error"
            } else {
                error.detail.as_str()
            };
            text.push_str(&format!("- {} failed: {}\n", error.tool_name, detail));
            if described.contains(&error.tool_name.as_str()) {
                continue;
            }
            described.push(&error.tool_name);
            if let Some(schema) = self.dispatcher.cache().get_schema(&error.tool_name) {
                text.push_str(&format!(
                    "  Current input contract for {}: {}\n",
                    error.tool_name, schema.input_contract
                ));
            }
        }
        text.push_str(
            "Issue a corrected tool request that follows the contract exactly, \
             or answer directly if no tool is needed.",
        );
        text
    }

    /// Serve one caller request end to end.
    pub async fn handle_request(
        &self,
        request: IncomingRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, OrchestratorError> {
        let request = to_canonical(request);
        request
            .validate()
            .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;

        let started = Instant::now();
        let mut history = Vec::with_capacity(2);
        if let Some(prompt) = &self.config.system_prompt {
            history.push(Message::system(prompt.clone()));
        }
        history.push(Message::user(request.message.content.clone()));

        let report = self.run_turn(history, cancel).await;
        let options = &request.options.response;
        let metadata = options.include_metadata.then(|| {
            json!({
                "conversation_id": request.context.conversation_id,
                "agent_id": request.context.agent_id,
                "final_state": report.final_state,
                "tool_rounds": report.tool_rounds,
                "corrective_calls": report.corrective_calls,
                "synthesized": report.synthesized,
                "tool_errors": report.observed_errors,
            })
        });
        let metrics = options.include_metrics.then(|| {
            json!({
                "model_calls": report.model_calls,
                "duration_ms": started.elapsed().as_millis() as u64,
                "tools": self.dispatcher.snapshot(),
            })
        });

        info!(
            conversation_id = %request.context.conversation_id,
            state = %report.final_state,
            model_calls = report.model_calls,
            tool_rounds = report.tool_rounds,
            "Turn finished"
        );

        let mut response = AgentResponse::text(report.into_result()?);
        response.metadata = metadata;
        response.metrics = metrics;
        Ok(response)
    }
}

/// Working state of a single turn.
struct Turn {
    state: TurnState,
    /// Next model input. Equal to the durable history until a corrective
    /// call replaces it with a sanitized copy plus guidance.
    context: Vec<Message>,
    report: TurnReport,
}

impl Turn {
    fn new(history: Vec<Message>) -> Self {
        Self {
            state: TurnState::AwaitingModel,
            context: history.clone(),
            report: TurnReport::new(history),
        }
    }

    fn advance(&mut self, to: TurnState) {
        debug!(from = %self.state, to = %to, "Turn transition");
        self.report.transitions.push(Transition {
            from: self.state,
            to,
        });
        self.state = to;
        self.report.final_state = to;
    }

    /// Append an assistant request and its answers to the durable history as
    /// one unit, returning the appended messages.
    fn record_round(
        &mut self,
        request: Message,
        results: &[ToolResult],
        attempt: u32,
    ) -> Vec<Message> {
        let mut round = Vec::with_capacity(results.len() + 1);
        round.push(request);
        round.extend(results.iter().map(ToolResult::to_message));
        self.report.history.extend(round.iter().cloned());
        self.report
            .observed_errors
            .extend(results.iter().filter_map(|r| ObservedError::from_result(r, attempt)));
        round
    }

    fn finish(&mut self, answer: String) {
        self.report.history.push(Message::assistant(answer.clone()));
        self.report.answer = Some(answer);
        self.advance(TurnState::Done);
    }

    fn fail(&mut self, error: OrchestratorError) {
        if error.is_structural() {
            error!(state = %self.state, error = %error, "Structural defect, turn failed");
        } else {
            warn!(state = %self.state, error = %error, "Turn failed");
        }
        self.report.failure = Some(error);
        self.advance(TurnState::Failed);
    }
}

async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    stage: &str,
    future: F,
) -> Result<F::Output, OrchestratorError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            Err(OrchestratorError::Cancelled(format!("cancelled while {stage}")))
        }
        output = future => Ok(output),
    }
}
