//! Responses wire format.
//!
//! Requests and answers are independent input items paired only by an opaque
//! `call_id` that is echoed back verbatim; there is no tool role.

use serde::{Deserialize, Serialize};

use crate::common::ToolDefinition;

// ============================================================================
// Input items
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseRole {
    System,
    Developer,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseInputItem {
    Message {
        role: ResponseRole,
        content: ResponseContent,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

/// Message content: either a bare string or a list of typed text parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseContent {
    Text(String),
    Parts(Vec<ResponseContentPart>),
}

impl ResponseContent {
    /// Concatenated text of all text-bearing parts.
    pub fn text(&self) -> String {
        match self {
            ResponseContent::Text(text) => text.clone(),
            ResponseContent::Parts(parts) => parts
                .iter()
                .filter_map(ResponseContentPart::text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentPart {
    InputText { text: String },
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Unknown,
}

impl ResponseContentPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            ResponseContentPart::InputText { text } | ResponseContentPart::OutputText { text } => {
                Some(text)
            }
            ResponseContentPart::Refusal { refusal } => Some(refusal),
            ResponseContentPart::Unknown => None,
        }
    }
}

// ============================================================================
// Tools
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFunctionTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

impl From<&ToolDefinition> for ResponseFunctionTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
        }
    }
}

// ============================================================================
// Request / Response
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponseInputItem>,
    pub tools: Option<Vec<ResponseFunctionTool>>,
    pub tool_choice: Option<String>,
    pub temperature: Option<f32>,
    /// Always false: the loop replays full input instead of relying on
    /// server-side response storage.
    pub store: Option<bool>,
    pub stream: Option<bool>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: Option<String>,
    pub model: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<ResponseOutputItem>,
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutputItem {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default)]
        content: Vec<ResponseContentPart>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    /// Reasoning summaries, built-in tool calls and other items the loop ignores.
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_input_items_serialize_with_type_tags() {
        let items = vec![
            ResponseInputItem::Message {
                role: ResponseRole::User,
                content: ResponseContent::Text("hi".to_string()),
            },
            ResponseInputItem::FunctionCall {
                call_id: "call_1".to_string(),
                name: "lookup".to_string(),
                arguments: "{}".to_string(),
            },
            ResponseInputItem::FunctionCallOutput {
                call_id: "call_1".to_string(),
                output: "done".to_string(),
            },
        ];

        let value = serde_json::to_value(&items).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "message", "role": "user", "content": "hi"},
                {"type": "function_call", "call_id": "call_1", "name": "lookup", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "done"}
            ])
        );
    }

    #[test]
    fn test_output_ignores_unknown_items() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "summary": []},
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": "Hello", "annotations": []}]
                },
                {"type": "function_call", "call_id": "call_9", "name": "f", "arguments": "{}"}
            ]
        }))
        .unwrap();

        assert_eq!(response.output.len(), 3);
        assert_eq!(response.output[0], ResponseOutputItem::Other);
        match &response.output[1] {
            ResponseOutputItem::Message { content, .. } => {
                assert_eq!(content[0].text(), Some("Hello"));
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_content_parts_text_concatenates() {
        let content: ResponseContent = serde_json::from_value(json!([
            {"type": "input_text", "text": "a"},
            {"type": "input_image", "image_url": "x"},
            {"type": "input_text", "text": "b"}
        ]))
        .unwrap();
        assert_eq!(content.text(), "ab");
    }
}
