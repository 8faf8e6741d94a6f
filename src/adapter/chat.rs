//! Role-paired framing.

use toolloop_protocol::{
    chat::{ChatCompletionResponse, ChatFunctionCall, ChatMessage, ChatRole, ChatToolCall},
    Message, Role, ToolCall,
};

use super::ParsedCompletion;
use crate::error::AdapterError;

pub(super) fn encode(history: &[Message]) -> Result<Vec<ChatMessage>, AdapterError> {
    history
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let role = match message.role {
                Role::System => ChatRole::System,
                Role::User => ChatRole::User,
                Role::Assistant => ChatRole::Assistant,
                Role::Tool => ChatRole::Tool,
            };

            let tool_call_id = if message.role == Role::Tool {
                Some(
                    message
                        .tool_call_id
                        .clone()
                        .ok_or(AdapterError::MissingToolCallId { index })?,
                )
            } else {
                None
            };

            let tool_calls = message
                .has_tool_calls()
                .then(|| message.tool_calls.iter().map(encode_call).collect());

            Ok(ChatMessage {
                role,
                content: message.content.clone(),
                tool_calls,
                tool_call_id,
                name: None,
            })
        })
        .collect()
}

fn encode_call(call: &ToolCall) -> ChatToolCall {
    ChatToolCall {
        id: call.id.clone(),
        tool_type: "function".to_string(),
        function: ChatFunctionCall {
            name: call.tool_name.clone(),
            arguments: call.arguments_json(),
        },
    }
}

pub(super) fn decode(messages: &[ChatMessage]) -> Result<Vec<Message>, AdapterError> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            Ok(match message.role {
                ChatRole::System | ChatRole::Developer => Message {
                    role: Role::System,
                    content: message.content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                },
                ChatRole::User => Message {
                    role: Role::User,
                    content: message.content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                },
                ChatRole::Assistant => {
                    Message::assistant_tool_calls(message.content.clone(), decode_calls(message))
                }
                ChatRole::Tool => Message {
                    role: Role::Tool,
                    content: message.content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(
                        message
                            .tool_call_id
                            .clone()
                            .ok_or(AdapterError::MissingToolCallId { index })?,
                    ),
                },
            })
        })
        .collect()
}

fn decode_calls(message: &ChatMessage) -> Vec<ToolCall> {
    message
        .tool_calls
        .iter()
        .flatten()
        .map(|call| {
            ToolCall::from_json_arguments(
                call.id.clone(),
                call.function.name.clone(),
                &call.function.arguments,
            )
        })
        .collect()
}

pub(super) fn parse_response(
    response: ChatCompletionResponse,
) -> Result<ParsedCompletion, AdapterError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(AdapterError::NoChoices)?;

    Ok(ParsedCompletion {
        tool_calls: decode_calls(&choice.message),
        content: choice.message.content,
    })
}
