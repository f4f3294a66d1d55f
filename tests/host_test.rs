// Multi-window host: routing, teardown, command dispatch

mod common;

use common::{MemoryHistory, RecordingUi, ScriptedLauncher};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard::config::Config;
use switchboard::decision::{DecisionCoordinator, DecisionRequest, OwnerKey, TenantState, REJECT_TIMEOUT, REJECT_TORN_DOWN};
use switchboard::dispatch::Dispatched;
use switchboard::host::Host;
use switchboard::protocol::WorkerEvent;
use switchboard::session::{PermissionMode, Role, UiEvent};
use tempfile::TempDir;

fn host(launcher: &Arc<ScriptedLauncher>) -> Host {
    Host::with_parts(
        Arc::new(Config::default()),
        launcher.clone(),
        Arc::new(MemoryHistory::default()),
    )
}

fn permission_requests(ui: &RecordingUi) -> usize {
    ui.count(|e| matches!(e, UiEvent::PermissionRequest(_)))
}

#[tokio::test]
async fn test_decision_reaches_only_the_owning_window() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let host = host(&launcher);
    let ui1 = Arc::new(RecordingUi::default());
    let ui2 = Arc::new(RecordingUi::default());
    let w1 = host.open_window("W1", "/tmp/one", ui1.clone()).await.unwrap();
    let w2 = host.open_window("W2", "/tmp/two", ui2.clone()).await.unwrap();
    assert_eq!(host.window_count(), 2);

    assert_eq!(w2.handle_line("send_message:list the files").await, Dispatched::Handler("send_message".into()));
    let worker = launcher.for_session(&w2.controller().session_id().await);
    worker.emit(WorkerEvent::DecisionNeeded(DecisionRequest::tool_permission(
        "ch-w2",
        "Bash",
        json!({"command": "ls"}),
    )));

    ui2.wait_for(|e| matches!(e, UiEvent::PermissionRequest(_))).await;
    assert_eq!(permission_requests(&ui1), 0);
    assert_eq!(host.coordinator().state(w2.owner()), TenantState::AwaitingDecision);
    assert_eq!(host.coordinator().state(w1.owner()), TenantState::Idle);

    // W1 cannot answer W2's request.
    w1.handle_line(r#"permission_decision:{"channelId":"ch-w2","allow":true}"#)
        .await;
    ui1.wait_for(|e| matches!(e, UiEvent::DecisionWithdrawn { .. })).await;
    assert!(worker.responses().is_empty());
    assert_eq!(host.coordinator().active_channel(w2.owner()).as_deref(), Some("ch-w2"));

    w2.handle_line(r#"permission_decision:{"channelId":"ch-w2","allow":false,"rejectMessage":"not now"}"#)
        .await;
    let response = worker.next_response().await;
    assert!(!response.allow);
    assert_eq!(response.reject_message.as_deref(), Some("not now"));
}

#[tokio::test]
async fn test_question_answer_round_trip() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let host = host(&launcher);
    let ui = Arc::new(RecordingUi::default());
    let window = host.open_window("W1", "/tmp/one", ui.clone()).await.unwrap();

    window.handle_line("send_message:help me pick").await;
    let worker = launcher.latest();
    let question: switchboard::decision::Question = serde_json::from_value(json!({
        "question": "Which database?",
        "header": "Storage",
        "options": [{"label": "sqlite"}, {"label": "postgres"}],
        "multiSelect": false
    }))
    .unwrap();
    worker.emit(WorkerEvent::DecisionNeeded(DecisionRequest::structured_question(
        "ch-q",
        vec![question],
    )));
    ui.wait_for(|e| matches!(e, UiEvent::QuestionRequest(_))).await;

    window
        .handle_line(r#"question_answer:{"channelId":"ch-q","answers":{"Which database?":"sqlite"}}"#)
        .await;
    let response = worker.next_response().await;
    assert!(response.allow);
    assert_eq!(response.answers.unwrap()["Which database?"], "sqlite");
}

#[tokio::test]
async fn test_close_window_tears_down_pending_decisions() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let host = host(&launcher);
    let ui = Arc::new(RecordingUi::default());
    let window = host.open_window("W1", "/tmp/one", ui.clone()).await.unwrap();
    let owner = OwnerKey::new("W1");

    window.handle_line("send_message:delete build dir").await;
    let worker = launcher.latest();
    worker.emit(WorkerEvent::DecisionNeeded(DecisionRequest::tool_permission(
        "ch-rm",
        "Bash",
        json!({"command": "rm -rf target"}),
    )));
    ui.wait_for(|e| matches!(e, UiEvent::PermissionRequest(_))).await;

    host.close_window(&owner).await;
    assert_eq!(host.window_count(), 0);
    assert!(!host.coordinator().is_registered(&owner));
    assert_eq!(host.coordinator().pending_count(&owner), 0);
    assert!(worker.is_terminated());

    let response = worker.next_response().await;
    assert!(!response.allow);
    assert_eq!(response.reject_message.as_deref(), Some(REJECT_TORN_DOWN));

    // Closing twice is harmless.
    host.close_window(&owner).await;
}

#[tokio::test]
async fn test_close_window_does_not_report_routing_gap() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let host = host(&launcher);
    let ui = Arc::new(RecordingUi::default());
    let window = host.open_window("W1", "/tmp/one", ui.clone()).await.unwrap();
    let owner = OwnerKey::new("W1");

    window.handle_line("send_message:clean up").await;
    let worker = launcher.latest();
    // A request raced in by the worker while the turn is being interrupted
    worker.emit_on_interrupt(WorkerEvent::DecisionNeeded(DecisionRequest::tool_permission(
        "ch-late",
        "Bash",
        json!({"command": "rm -rf target"}),
    )));

    host.close_window(&owner).await;
    assert_eq!(host.coordinator().routing_gaps(), 0);
    assert_eq!(host.coordinator().pending_count(&owner), 0);
    assert_eq!(permission_requests(&ui), 1);
    assert_eq!(ui.count(|e| matches!(e, UiEvent::DecisionWithdrawn { .. })), 1);

    let response = worker.next_response().await;
    assert!(!response.allow);
    assert_eq!(response.reject_message.as_deref(), Some(REJECT_TORN_DOWN));
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_window_times_out() {
    let config = Config::default();
    let coordinator = DecisionCoordinator::new(config.decision_timeout());
    let started = tokio::time::Instant::now();

    let response = coordinator
        .request_decision(
            &OwnerKey::new("never-opened"),
            DecisionRequest::tool_permission("ch-ghost", "Bash", json!({})),
        )
        .await;

    assert!(!response.allow);
    assert_eq!(response.reject_message.as_deref(), Some(REJECT_TIMEOUT));
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(coordinator.routing_gaps(), 1);
    assert_eq!(coordinator.pending_count(&OwnerKey::new("never-opened")), 0);
}

#[tokio::test]
async fn test_frontend_ready_announces_session() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let host = host(&launcher);
    let ui = Arc::new(RecordingUi::default());
    let window = host.open_window("W1", "/tmp/one", ui.clone()).await.unwrap();

    assert_eq!(window.handle_line("frontend_ready:").await, Dispatched::Lifecycle("frontend_ready".into()));
    let session_id = window.controller().session_id().await;
    assert!(ui.events().iter().any(
        |e| matches!(e, UiEvent::SessionCreated { session_id: id, .. } if *id == session_id)
    ));
    let commands = ui.wait_for(|e| matches!(e, UiEvent::SlashCommands { .. })).await;
    match commands {
        UiEvent::SlashCommands { commands } => assert!(commands.contains(&"/model".to_string())),
        _ => unreachable!(),
    }

    assert_eq!(window.handle_line(r#"console.log:"mounted""#).await, Dispatched::Console);
    assert_eq!(window.handle_line("open_palette:").await, Dispatched::Unknown("open_palette".into()));
    assert_eq!(window.handle_line("").await, Dispatched::Ignored);
}

#[tokio::test]
async fn test_slash_commands_change_settings_without_a_turn() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let host = host(&launcher);
    let ui = Arc::new(RecordingUi::default());
    let window = host.open_window("W1", "/tmp/one", ui.clone()).await.unwrap();

    window.handle_line("send_message:/model claude-opus-4").await;
    window.handle_line(r#"send_message:{"text":"/mode plan"}"#).await;
    let settings = window.controller().settings().await;
    assert_eq!(settings.model, "claude-opus-4");
    assert_eq!(settings.permission_mode, PermissionMode::Plan);
    assert_eq!(launcher.launched(), 0);

    let before = window.controller().session_id().await;
    window.handle_line("send_message:/new").await;
    assert_ne!(window.controller().session_id().await, before);
}

#[tokio::test]
async fn test_busy_conflict_becomes_error_status() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let host = host(&launcher);
    let ui = Arc::new(RecordingUi::default());
    let window = host.open_window("W1", "/tmp/one", ui.clone()).await.unwrap();

    window.handle_line("send_message:first").await;
    let outcome = window.handle_line("send_message:second").await;
    assert!(matches!(outcome, Dispatched::Failed(_)));
    assert!(ui.events().iter().any(|e| matches!(e,
        UiEvent::Status { level: switchboard::session::StatusLevel::Error, .. })));

    window.handle_line("interrupt_session:").await;
    assert!(!window.controller().is_busy().await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_worker_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.worker.program = "sh".into();
    config.worker.args = vec![
        "-c".into(),
        r#"
while IFS= read -r line; do
  case "$line" in
    *'"type":"turn"'*)
      printf '%s\n' '{"type":"content_delta","text":"hello "}' '{"type":"content_delta","text":"world"}' '{"type":"turn_end"}' ;;
  esac
done
"#
        .into(),
    ];
    config.decision.exchange_dir = dir.path().join("exchange");
    config.decision.file_exchange = false;
    config.history_dir = dir.path().join("history");

    let host = Host::new(Arc::new(config));
    let ui = Arc::new(RecordingUi::default());
    let window = host.open_window("main", dir.path(), ui.clone()).await.unwrap();

    window.handle_line("send_message:greet me").await;
    ui.wait_idle().await;

    let messages = window.controller().messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "hello world");

    // Persisted as JSONL under the history dir.
    let session_id = window.controller().session_id().await;
    let log = std::fs::read_to_string(dir.path().join("history").join(format!("{}.jsonl", session_id))).unwrap();
    assert_eq!(log.lines().count(), 2);

    host.shutdown().await;
    assert_eq!(host.window_count(), 0);
}
