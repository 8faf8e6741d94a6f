//! Turn state, transitions and the report handed back after a turn.

use std::fmt;

use serde::Serialize;
use toolloop_protocol::{Message, ToolOutcome, ToolResult};

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    AwaitingModel,
    ExecutingTools,
    Retrying,
    Synthesizing,
    Done,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnState::AwaitingModel => "AWAITING_MODEL",
            TurnState::ExecutingTools => "EXECUTING_TOOLS",
            TurnState::Retrying => "RETRYING",
            TurnState::Synthesizing => "SYNTHESIZING",
            TurnState::Done => "DONE",
            TurnState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: TurnState,
    pub to: TurnState,
}

/// A non-successful tool result seen during the turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedError {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub detail: String,
    /// Corrective attempt the failing call belonged to, 0 for a first try.
    pub attempt: u32,
}

impl ObservedError {
    pub(crate) fn from_result(result: &ToolResult, attempt: u32) -> Option<Self> {
        (!result.is_success()).then(|| Self {
            call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            outcome: result.outcome,
            detail: result.error_detail.clone().unwrap_or_default(),
            attempt,
        })
    }
}

/// Corrective retry bookkeeping. Exists only while consecutive tool rounds
/// keep failing with retryable errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub attempt_count: u32,
    pub temperature_bias: f32,
    pub guidance_message: Option<String>,
    pub observed_errors: Vec<ObservedError>,
}

impl RetryState {
    /// Errors that made corrective attempt `attempt` necessary.
    pub fn errors_in(&self, attempt: u32) -> impl Iterator<Item = &ObservedError> {
        self.observed_errors
            .iter()
            .filter(move |e| e.attempt == attempt)
    }
}

/// Outcome of one turn.
#[derive(Debug)]
pub struct TurnReport {
    /// Durable history: the input plus every assistant request, its tool
    /// answers and the final answer. Guidance messages are not recorded.
    pub history: Vec<Message>,
    pub transitions: Vec<Transition>,
    pub observed_errors: Vec<ObservedError>,
    pub model_calls: u32,
    pub tool_rounds: u32,
    pub corrective_calls: u32,
    pub synthesized: bool,
    pub final_state: TurnState,
    pub answer: Option<String>,
    pub failure: Option<OrchestratorError>,
}

impl TurnReport {
    pub(crate) fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            transitions: Vec::new(),
            observed_errors: Vec::new(),
            model_calls: 0,
            tool_rounds: 0,
            corrective_calls: 0,
            synthesized: false,
            final_state: TurnState::AwaitingModel,
            answer: None,
            failure: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.final_state == TurnState::Done
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    /// Every state visited, starting with `AWAITING_MODEL`.
    pub fn states(&self) -> Vec<TurnState> {
        std::iter::once(TurnState::AwaitingModel)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    pub fn into_result(self) -> Result<String, OrchestratorError> {
        match (self.answer, self.failure) {
            (_, Some(failure)) => Err(failure),
            (Some(answer), None) => Ok(answer),
            (None, None) => Err(OrchestratorError::Cancelled(format!(
                "turn stopped in {} without an answer",
                self.final_state
            ))),
        }
    }
}
