//! Property tests: sanitizer, wire round-trips and tool loop bounds.

mod common;

use common::*;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use toolloop::{
    adapter::{from_wire, to_wire},
    sanitize, CancellationToken, GatewayError, TurnState, WireCompletion, WireVariant,
};
use toolloop_mcp::{DiscoveredTool, InvocationError, InvocationOutput, ToolErrorKind};
use toolloop_protocol::{has_tool_structure, validate_pairing, Message, Role, ToolCall};

// ============================================================================
// Generators
// ============================================================================

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ,.?]{1,24}"
}

fn arb_arguments() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        "[a-z_]{1,8}",
        prop_oneof![
            arb_text().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ],
        0..4,
    )
    .prop_map(|args| args.into_iter().collect())
}

/// Any message, including unpaired tool structure.
fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        arb_text().prop_map(Message::system),
        arb_text().prop_map(Message::user),
        arb_text().prop_map(Message::assistant),
        (
            prop::option::of(arb_text()),
            prop::collection::vec(("[a-z0-9]{4}", "[a-z]{3,8}"), 0..3)
        )
            .prop_map(|(content, calls)| {
                Message::assistant_tool_calls(
                    content,
                    calls
                        .into_iter()
                        .map(|(id, name)| ToolCall::new(id, name, Map::new()))
                        .collect(),
                )
            }),
        ("[a-z0-9]{4}", arb_text()).prop_map(|(id, text)| Message::tool(id, text)),
    ]
}

#[derive(Debug, Clone)]
enum Block {
    User(String),
    Assistant(String),
    EmptyAssistant,
    ToolRound {
        content: Option<String>,
        calls: Vec<(String, Map<String, Value>, String)>,
    },
}

fn arb_block() -> impl Strategy<Value = Block> {
    prop_oneof![
        arb_text().prop_map(Block::User),
        arb_text().prop_map(Block::Assistant),
        Just(Block::EmptyAssistant),
        (
            prop::option::of(arb_text()),
            prop::collection::vec(("[a-z]{3,8}", arb_arguments(), arb_text()), 1..4)
        )
            .prop_map(|(content, calls)| Block::ToolRound { content, calls }),
    ]
}

/// Validly paired history, including content-less assistant turns.
fn arb_paired_history() -> impl Strategy<Value = Vec<Message>> {
    (arb_text(), prop::collection::vec(arb_block(), 0..8)).prop_map(|(system, blocks)| {
        let mut history = vec![Message::system(system)];
        let mut next_id = 0;
        for block in blocks {
            match block {
                Block::User(text) => history.push(Message::user(text)),
                Block::Assistant(text) => history.push(Message::assistant(text)),
                Block::EmptyAssistant => {
                    history.push(Message::assistant_tool_calls(None, Vec::new()))
                }
                Block::ToolRound { content, calls } => {
                    let mut requests = Vec::new();
                    let mut answers = Vec::new();
                    for (name, arguments, output) in calls {
                        next_id += 1;
                        let id = format!("call_{next_id}");
                        answers.push(Message::tool(id.clone(), output));
                        requests.push(ToolCall::new(id, name, arguments));
                    }
                    history.push(Message::assistant_tool_calls(content, requests));
                    history.extend(answers);
                }
            }
        }
        history
    })
}

// ============================================================================
// Pure properties
// ============================================================================

proptest! {
    #[test]
    fn prop_sanitize_is_idempotent(history in prop::collection::vec(arb_message(), 0..12)) {
        let once = sanitize(&history);
        prop_assert_eq!(sanitize(&once), once.clone());
        prop_assert!(!has_tool_structure(&once));
        prop_assert!(validate_pairing(&once).is_ok());
    }

    #[test]
    fn prop_sanitize_keeps_system_and_user(history in prop::collection::vec(arb_message(), 0..12)) {
        let kept = |messages: &[Message]| -> Vec<Message> {
            messages
                .iter()
                .filter(|m| matches!(m.role, Role::System | Role::User))
                .cloned()
                .collect()
        };
        prop_assert_eq!(kept(&sanitize(&history)), kept(&history));
    }

    #[test]
    fn prop_wire_round_trip(history in arb_paired_history()) {
        prop_assert!(validate_pairing(&history).is_ok());
        for variant in [WireVariant::Chat, WireVariant::Responses] {
            let wire = to_wire(variant, &history).unwrap();
            prop_assert_eq!(wire.variant(), variant);
            prop_assert_eq!(from_wire(&wire).unwrap(), history.clone());
        }
    }
}

// ============================================================================
// Tool loop bounds
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Answer,
    GoodCall,
    BadCall,
    FatalCall,
    TransportError,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        1 => Just(Step::Answer),
        4 => Just(Step::GoodCall),
        4 => Just(Step::BadCall),
        1 => Just(Step::FatalCall),
        1 => Just(Step::TransportError),
    ]
}

fn script(steps: &[Step]) -> Vec<Result<WireCompletion, GatewayError>> {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let id = format!("call_{i}");
            match step {
                Step::Answer => text("done"),
                Step::GoodCall => {
                    tool_calls(&[(id.as_str(), "weather", json!({"location": "Oslo"}))])
                }
                Step::BadCall => tool_calls(&[(id.as_str(), "weather", json!({"city": "Oslo"}))]),
                Step::FatalCall => tool_calls(&[(id.as_str(), "deploy", json!({}))]),
                Step::TransportError => Err(GatewayError::Transport("reset".into())),
            }
        })
        .collect()
}

fn loop_connection() -> std::sync::Arc<InMemoryConnection> {
    let weather = weather_handler();
    let handler: Handler = std::sync::Arc::new(
        move |tool: &str, arguments: &Map<String, Value>| match tool {
            "deploy" => Ok(InvocationOutput::failed(
                Value::Null,
                InvocationError::new(ToolErrorKind::Disabled, "deploy is disabled"),
            )),
            _ => weather(tool, arguments),
        },
    );
    InMemoryConnection::new(
        "tools",
        vec![
            weather_tool("location"),
            DiscoveredTool::new("deploy", json!({"type": "object"})),
        ],
        handler,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_tool_loop_terminates_within_bounds(steps in prop::collection::vec(arb_step(), 0..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (report, requests) = runtime.block_on(async {
            let harness = harness(script(&steps), vec![loop_connection()]).await;
            let report = harness
                .orchestrator
                .run_turn(user_history("Weather?"), &CancellationToken::new())
                .await;
            (report, harness.backend.requests())
        });

        let config = toolloop::OrchestratorConfig::default();
        prop_assert!(report.final_state.is_terminal());
        prop_assert!(matches!(report.final_state, TurnState::Done | TurnState::Failed));
        prop_assert!(report.corrective_calls <= config.max_retry_attempts);
        prop_assert!(report.tool_rounds <= config.max_tool_rounds);
        let synthesis = u32::from(report.states().contains(&TurnState::Synthesizing));
        prop_assert!(
            report.model_calls - synthesis <= config.max_tool_rounds + config.max_retry_attempts,
            "model calls {} (synthesis attempted: {})", report.model_calls, synthesis
        );
        prop_assert!(validate_pairing(&report.history).is_ok());

        // Tool-disabled requests never carry tool structure.
        for request in requests.iter().filter(|r| r.tool_count() == 0) {
            for message in sent_messages(request) {
                prop_assert!(message["role"] != "tool");
                prop_assert!(message.get("tool_calls").is_none());
            }
        }
        if report.final_state == TurnState::Done {
            prop_assert!(report.answer().is_some());
            prop_assert_eq!(report.history.last().map(|m| m.role), Some(Role::Assistant));
        } else {
            prop_assert!(report.failure.is_some());
        }
    }
}
