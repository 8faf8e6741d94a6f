//! Synthesis Sanitizer.
//!
//! Builds the message list for a tool-disabled completion call. System and
//! user messages pass through; assistant messages keep their text and lose
//! their tool requests; tool answers are dropped. An assistant message left
//! with no text is dropped as well, since an empty assistant turn is not
//! accepted by every backend.

use toolloop_protocol::{Message, Role};

/// Return a new history with every tool reference removed.
pub fn sanitize(history: &[Message]) -> Vec<Message> {
    history
        .iter()
        .filter_map(|message| match message.role {
            Role::System | Role::User => Some(Message {
                tool_calls: Vec::new(),
                tool_call_id: None,
                ..message.clone()
            }),
            Role::Assistant => message
                .content
                .as_deref()
                .filter(|text| !text.is_empty())
                .map(Message::assistant),
            Role::Tool => None,
        })
        .collect()
}
