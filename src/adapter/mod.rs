//! Message Format Adapter.
//!
//! Converts canonical history to and from the two backend framings, and the
//! caller-facing request/response shapes to and from their canonical forms.
//! Every function here is pure.
//!
//! Wire data is carried as tagged unions ([`WireMessages`], [`WireRequest`],
//! [`WireCompletion`]) so callers never branch on the variant themselves.

mod chat;
mod request;
mod responses;

use serde::{Deserialize, Serialize};
use toolloop_protocol::{
    chat::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatTool},
    responses::{ResponseFunctionTool, ResponseInputItem, ResponsesRequest, ResponsesResponse},
    Message, ToolCall, ToolDefinition,
};

pub use request::{from_canonical, to_canonical};

use crate::error::AdapterError;

/// Backend framing for tool requests and their answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireVariant {
    /// Role-based pairing: `tool_calls` on the assistant message, answers as
    /// `role: tool` messages with `tool_call_id`.
    #[default]
    Chat,
    /// Call-id pairing: `function_call` and `function_call_output` items.
    Responses,
}

impl WireVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireVariant::Chat => "chat",
            WireVariant::Responses => "responses",
        }
    }
}

impl std::fmt::Display for WireVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A framed message list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireMessages {
    Chat(Vec<ChatMessage>),
    Responses(Vec<ResponseInputItem>),
}

impl WireMessages {
    pub fn variant(&self) -> WireVariant {
        match self {
            WireMessages::Chat(_) => WireVariant::Chat,
            WireMessages::Responses(_) => WireVariant::Responses,
        }
    }
}

/// A complete completion request in one framing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireRequest {
    Chat(ChatCompletionRequest),
    Responses(ResponsesRequest),
}

impl WireRequest {
    pub fn variant(&self) -> WireVariant {
        match self {
            WireRequest::Chat(_) => WireVariant::Chat,
            WireRequest::Responses(_) => WireVariant::Responses,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            WireRequest::Chat(req) => &req.model,
            WireRequest::Responses(req) => &req.model,
        }
    }

    /// Number of advertised tools.
    pub fn tool_count(&self) -> usize {
        match self {
            WireRequest::Chat(req) => req.tools.as_ref().map_or(0, Vec::len),
            WireRequest::Responses(req) => req.tools.as_ref().map_or(0, Vec::len),
        }
    }
}

/// A backend answer in one framing.
#[derive(Debug, Clone, PartialEq)]
pub enum WireCompletion {
    Chat(ChatCompletionResponse),
    Responses(ResponsesResponse),
}

/// What a completion produced: optional text and zero or more tool requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Frame canonical history for `variant`.
pub fn to_wire(variant: WireVariant, history: &[Message]) -> Result<WireMessages, AdapterError> {
    Ok(match variant {
        WireVariant::Chat => WireMessages::Chat(chat::encode(history)?),
        WireVariant::Responses => WireMessages::Responses(responses::encode(history)?),
    })
}

/// Recover canonical history from a framed message list.
pub fn from_wire(messages: &WireMessages) -> Result<Vec<Message>, AdapterError> {
    match messages {
        WireMessages::Chat(messages) => chat::decode(messages),
        WireMessages::Responses(items) => Ok(responses::decode(items)),
    }
}

/// Build a full request. `tools` is advertised only when non-empty.
pub fn build_request(
    variant: WireVariant,
    model: &str,
    history: &[Message],
    tools: &[ToolDefinition],
    temperature: f32,
) -> Result<WireRequest, AdapterError> {
    let (tools, tool_choice) = if tools.is_empty() {
        (None, None)
    } else {
        (Some(tools), Some("auto".to_string()))
    };

    Ok(match to_wire(variant, history)? {
        WireMessages::Chat(messages) => WireRequest::Chat(ChatCompletionRequest {
            model: model.to_string(),
            messages,
            tools: tools.map(|defs| defs.iter().map(ChatTool::from).collect()),
            tool_choice,
            temperature: Some(temperature),
            stream: Some(false),
        }),
        WireMessages::Responses(input) => WireRequest::Responses(ResponsesRequest {
            model: model.to_string(),
            input,
            tools: tools.map(|defs| defs.iter().map(ResponseFunctionTool::from).collect()),
            tool_choice,
            temperature: Some(temperature),
            store: Some(false),
            stream: Some(false),
        }),
    })
}

/// Extract content and tool requests from a backend answer.
pub fn parse_completion(completion: WireCompletion) -> Result<ParsedCompletion, AdapterError> {
    match completion {
        WireCompletion::Chat(response) => chat::parse_response(response),
        WireCompletion::Responses(response) => Ok(responses::parse_response(response)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_history() -> Vec<Message> {
        let mut args = serde_json::Map::new();
        args.insert("city".into(), json!("Paris"));
        vec![
            Message::system("be brief"),
            Message::user("weather?"),
            Message::assistant_tool_calls(
                Some("checking".into()),
                vec![ToolCall::new("call_1", "get_weather", args)],
            ),
            Message::tool("call_1", r#"{"temp":21}"#),
            Message::assistant("It is 21 degrees."),
        ]
    }

    #[test]
    fn test_round_trip_both_variants() {
        let history = sample_history();
        for variant in [WireVariant::Chat, WireVariant::Responses] {
            let wire = to_wire(variant, &history).unwrap();
            assert_eq!(wire.variant(), variant);
            assert_eq!(from_wire(&wire).unwrap(), history, "variant {variant}");
        }
    }

    #[test]
    fn test_build_request_without_tools_omits_advertisement() {
        let request =
            build_request(WireVariant::Chat, "m", &[Message::user("hi")], &[], 0.5).unwrap();
        assert_eq!(request.tool_count(), 0);
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_build_request_advertises_in_variant_shape() {
        let tools = vec![ToolDefinition {
            name: "search".into(),
            description: Some("Search".into()),
            parameters: json!({"type": "object"}),
        }];

        let chat = build_request(WireVariant::Chat, "m", &[Message::user("hi")], &tools, 0.7)
            .unwrap();
        let body = serde_json::to_value(&chat).unwrap();
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "search");

        let responses =
            build_request(WireVariant::Responses, "m", &[Message::user("hi")], &tools, 0.7)
                .unwrap();
        let body = serde_json::to_value(&responses).unwrap();
        assert_eq!(body["tools"][0]["name"], "search");
        assert_eq!(body["store"], false);
        assert_eq!(body["input"][0]["type"], "message");
        assert_eq!(responses.model(), "m");
    }
}
