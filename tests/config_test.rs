//! Configuration file loading and wiring.

mod common;

use std::io::Write;

use tempfile::NamedTempFile;
use toolloop::{
    config::{ConfigError, ConfigValidationError},
    logging::init_logging,
    CancellationToken, Orchestrator, ToolLoopConfig, TurnState, WireVariant,
};
use toolloop_mcp::ToolRuntime;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_load_from_file() {
    let file = write_config(
        r#"
gateway:
  base_url: "http://127.0.0.1:9999"
  model: "gpt-5-mini"
  variant_overrides:
    "gpt-5": responses
orchestrator:
  max_tool_rounds: 2
  tool_timeout_ms: 1000
tools:
  dispatch:
    call_timeout_ms: 500
logging:
  level: "toolloop=debug"
"#,
    );

    let config = ToolLoopConfig::from_file(file.path()).await.unwrap();
    assert_eq!(config.gateway.model, "gpt-5-mini");
    assert_eq!(config.orchestrator.max_tool_rounds, 2);
    assert_eq!(config.orchestrator.max_retry_attempts, 3);
    assert_eq!(config.tools.dispatch.call_timeout_ms, 500);
    assert_eq!(config.logging.level, "toolloop=debug");
}

#[tokio::test]
async fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ToolLoopConfig::from_file(dir.path().join("absent.yaml"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[tokio::test]
async fn test_invalid_file_is_rejected() {
    let file = write_config(
        r#"
tools:
  servers:
    - name: a
      protocol: stdio
      command: x
    - name: a
      protocol: stdio
      command: y
"#,
    );
    let err = ToolLoopConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid(ConfigValidationError::Tools(_))
    ));

    let file = write_config("gateway: [not, a, map]\n");
    let err = ToolLoopConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[tokio::test]
async fn test_orchestrator_from_config() {
    let file = write_config(
        r#"
gateway:
  model: "gpt-5-mini"
  variant_overrides:
    "gpt-5": responses
"#,
    );
    let config = ToolLoopConfig::from_file(file.path()).await.unwrap();
    init_logging(&config.logging);

    let runtime = ToolRuntime::connect(&config.tools).await.unwrap();
    let backend = common::ScriptedBackend::new(vec![common::text("configured")]);
    let orchestrator = Orchestrator::from_config(&config, backend.clone(), &runtime);

    assert_eq!(orchestrator.gateway().variant(), WireVariant::Responses);
    assert_eq!(orchestrator.config().max_tool_rounds, 5);

    // The scripted answer is a chat completion; a responses-framed request
    // still accepts it because parsing follows the completion's own shape.
    let report = orchestrator
        .run_turn(common::user_history("hi"), &CancellationToken::new())
        .await;
    assert_eq!(report.final_state, TurnState::Done);
    assert!(matches!(
        backend.requests()[0],
        toolloop::WireRequest::Responses(_)
    ));
}
