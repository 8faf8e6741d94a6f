//! Call-id paired framing.
//!
//! An assistant turn becomes a `message` item (when it has content) followed
//! by one `function_call` item per request; each tool answer becomes a
//! `function_call_output` item. On the way back, `function_call` items attach
//! to the assistant message right before them, or start a new one.
//!
//! A content-less assistant turn that would otherwise be lost or merged (no
//! calls, or directly after another assistant turn) is framed as an assistant
//! `message` with an empty content list.

use toolloop_protocol::{
    responses::{
        ResponseContent, ResponseContentPart, ResponseInputItem, ResponseOutputItem, ResponseRole,
        ResponsesResponse,
    },
    Message, Role, ToolCall,
};

use super::ParsedCompletion;
use crate::error::AdapterError;

pub(super) fn encode(history: &[Message]) -> Result<Vec<ResponseInputItem>, AdapterError> {
    let mut items = Vec::with_capacity(history.len());
    for (index, message) in history.iter().enumerate() {
        match message.role {
            Role::System => items.push(text_item(ResponseRole::System, message)),
            Role::User => items.push(text_item(ResponseRole::User, message)),
            Role::Assistant => {
                let follows_assistant = index > 0 && history[index - 1].role == Role::Assistant;
                if message.content.is_some() {
                    items.push(text_item(ResponseRole::Assistant, message));
                } else if message.tool_calls.is_empty() || follows_assistant {
                    items.push(ResponseInputItem::Message {
                        role: ResponseRole::Assistant,
                        content: ResponseContent::Parts(Vec::new()),
                    });
                }
                items.extend(message.tool_calls.iter().map(|call| {
                    ResponseInputItem::FunctionCall {
                        call_id: call.id.clone(),
                        name: call.tool_name.clone(),
                        arguments: call.arguments_json(),
                    }
                }));
            }
            Role::Tool => {
                let call_id = message
                    .tool_call_id
                    .clone()
                    .ok_or(AdapterError::MissingToolCallId { index })?;
                items.push(ResponseInputItem::FunctionCallOutput {
                    call_id,
                    output: message.text().to_string(),
                });
            }
        }
    }
    Ok(items)
}

fn text_item(role: ResponseRole, message: &Message) -> ResponseInputItem {
    ResponseInputItem::Message {
        role,
        content: ResponseContent::Text(message.text().to_string()),
    }
}

pub(super) fn decode(items: &[ResponseInputItem]) -> Vec<Message> {
    let mut history: Vec<Message> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            ResponseInputItem::Message { role, content } => {
                let text = content.text();
                history.push(match role {
                    ResponseRole::System | ResponseRole::Developer => Message::system(text),
                    ResponseRole::User => Message::user(text),
                    ResponseRole::Assistant if is_empty_parts(content) => {
                        Message::assistant_tool_calls(None, Vec::new())
                    }
                    ResponseRole::Assistant => Message::assistant(text),
                });
            }
            ResponseInputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => attach_call(
                &mut history,
                ToolCall::from_json_arguments(call_id.clone(), name.clone(), arguments),
            ),
            ResponseInputItem::FunctionCallOutput { call_id, output } => {
                history.push(Message::tool(call_id.clone(), output.clone()));
            }
        }
    }
    history
}

fn is_empty_parts(content: &ResponseContent) -> bool {
    matches!(content, ResponseContent::Parts(parts) if parts.is_empty())
}

fn attach_call(history: &mut Vec<Message>, call: ToolCall) {
    match history.last_mut() {
        Some(last) if last.role == Role::Assistant => last.tool_calls.push(call),
        _ => history.push(Message::assistant_tool_calls(None, vec![call])),
    }
}

pub(super) fn parse_response(response: ResponsesResponse) -> ParsedCompletion {
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();

    for item in response.output {
        match item {
            ResponseOutputItem::Message { content, .. } => {
                texts.extend(
                    content
                        .iter()
                        .filter(|part| !matches!(part, ResponseContentPart::InputText { .. }))
                        .filter_map(ResponseContentPart::text)
                        .map(str::to_string),
                );
            }
            ResponseOutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => tool_calls.push(ToolCall::from_json_arguments(call_id, name, &arguments)),
            ResponseOutputItem::Other => {}
        }
    }

    ParsedCompletion {
        content: (!texts.is_empty()).then(|| texts.concat()),
        tool_calls,
    }
}
