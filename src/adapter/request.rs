//! Caller-facing request and response conversion.

use toolloop_protocol::agent::{
    AgentRequest, AgentResponse, InboundMessage, IncomingRequest, LegacyAgentRequest,
    LegacyAgentResponse, RequestContext, RequestOptions, ResponseOptions,
};

/// Upconvert either request shape to the canonical form.
///
/// Legacy requests missing an option block get the fixed defaults; their
/// `stream` flag seeds `options.response.stream` when no response block is
/// given.
pub fn to_canonical(request: IncomingRequest) -> AgentRequest {
    match request {
        IncomingRequest::Canonical(request) => request,
        IncomingRequest::Legacy(legacy) => upconvert_legacy(legacy),
    }
}

fn upconvert_legacy(legacy: LegacyAgentRequest) -> AgentRequest {
    let response = legacy.response.unwrap_or_else(|| ResponseOptions {
        stream: legacy.stream.unwrap_or(false),
        ..ResponseOptions::default()
    });

    AgentRequest {
        message: InboundMessage {
            content: legacy.message,
        },
        context: RequestContext {
            agent_id: legacy.agent_id,
            user_id: legacy.user_id,
            conversation_id: legacy.conversation_id,
        },
        options: RequestOptions {
            memory: legacy.memory.unwrap_or_default(),
            state: legacy.state.unwrap_or_default(),
            response,
        },
    }
}

/// Down-convert a canonical response for legacy clients.
pub fn from_canonical(
    response: &AgentResponse,
    conversation_id: Option<String>,
) -> LegacyAgentResponse {
    response.to_legacy(conversation_id)
}
