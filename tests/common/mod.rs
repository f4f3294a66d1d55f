// Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard::config::Config;
use switchboard::decision::{DecisionCoordinator, DecisionResponse, OwnerKey};
use switchboard::error::Result;
use switchboard::protocol::{TurnInput, WorkerEvent};
use switchboard::session::{
    HistoryStore, Message, PermissionMode, Session, SessionController, SessionOptions, SessionServices,
    SessionSettings, UiEvent, UiSink,
};
use switchboard::worker::{TurnStream, TurnTracker, WorkerBridge, WorkerLauncher};
use tokio::sync::Notify;

pub const WAIT: Duration = Duration::from_secs(5);

/// Worker driven by the test: events are pushed with `emit`
pub struct ScriptedWorker {
    session_id: String,
    turns: TurnTracker,
    inputs: Mutex<Vec<TurnInput>>,
    responses: Mutex<Vec<DecisionResponse>>,
    responded: Notify,
    terminated: AtomicBool,
    on_interrupt: Mutex<Option<WorkerEvent>>,
}

impl ScriptedWorker {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: TurnTracker::new(),
            inputs: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            responded: Notify::new(),
            terminated: AtomicBool::new(false),
            on_interrupt: Mutex::new(None),
        }
    }

    /// Event the worker emits when interrupted, just before the turn settles
    pub fn emit_on_interrupt(&self, event: WorkerEvent) {
        *self.on_interrupt.lock().unwrap() = Some(event);
    }

    pub fn emit(&self, event: WorkerEvent) -> bool {
        self.turns.deliver(event)
    }

    pub fn end_turn(&self) -> bool {
        self.emit(WorkerEvent::TurnEnd {
            final_message: None,
            interrupted: false,
        })
    }

    pub fn inputs(&self) -> Vec<TurnInput> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn responses(&self) -> Vec<DecisionResponse> {
        self.responses.lock().unwrap().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the next decision response delivered to this worker
    pub async fn next_response(&self) -> DecisionResponse {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.responded.notified();
                if let Some(response) = self.responses.lock().unwrap().first().cloned() {
                    return response;
                }
                notified.await;
            }
        })
        .await
        .expect("worker never received a decision response")
    }
}

#[async_trait]
impl WorkerBridge for ScriptedWorker {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, input: TurnInput) -> Result<TurnStream> {
        let stream = self.turns.begin(&self.session_id, &input.turn_id)?;
        self.inputs.lock().unwrap().push(input);
        Ok(stream)
    }

    async fn interrupt(&self) -> Result<()> {
        if let Some(event) = self.on_interrupt.lock().unwrap().take() {
            self.turns.deliver(event);
        }
        self.turns.settle(WorkerEvent::interrupted());
        Ok(())
    }

    async fn respond(&self, response: DecisionResponse) -> Result<bool> {
        self.responses.lock().unwrap().push(response);
        self.responded.notify_waiters();
        Ok(true)
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.turns.settle(WorkerEvent::interrupted());
    }

    fn is_busy(&self) -> bool {
        self.turns.is_busy()
    }
}

/// Launcher handing out scripted workers, remembered by session id
#[derive(Default)]
pub struct ScriptedLauncher {
    launched: Mutex<Vec<Arc<ScriptedWorker>>>,
}

impl ScriptedLauncher {
    pub fn launched(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<ScriptedWorker> {
        self.launched
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no worker launched yet")
    }

    pub fn for_session(&self, session_id: &str) -> Arc<ScriptedWorker> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|w| w.session_id == session_id)
            .cloned()
            .expect("no worker for session")
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn start(&self, session: &Session) -> Result<Arc<dyn WorkerBridge>> {
        let worker = Arc::new(ScriptedWorker::new(session.id.clone()));
        self.launched.lock().unwrap().push(Arc::clone(&worker));
        Ok(worker)
    }
}

/// UI sink recording everything it is told
#[derive(Default)]
pub struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
    changed: Notify,
}

impl RecordingUi {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&UiEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(*e)).count()
    }

    /// Wait until an event matching `predicate` has been recorded
    pub async fn wait_for(&self, predicate: impl Fn(&UiEvent) -> bool) -> UiEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.changed.notified();
                if let Some(event) = self.events.lock().unwrap().iter().find(|e| predicate(*e)).cloned() {
                    return event;
                }
                notified.await;
            }
        })
        .await
        .expect("expected UI event never arrived")
    }

    pub async fn wait_idle(&self) {
        self.wait_for(|e| matches!(e, UiEvent::Busy { busy: false, .. })).await;
    }
}

impl UiSink for RecordingUi {
    fn emit(&self, event: UiEvent) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }
}

/// History kept in memory
#[derive(Default)]
pub struct MemoryHistory {
    logs: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryHistory {
    pub fn with_session(session_id: &str, messages: Vec<Message>) -> Self {
        let history = Self::default();
        history.logs.lock().unwrap().insert(session_id.to_string(), messages);
        history
    }

    pub fn log(&self, session_id: &str) -> Vec<Message> {
        self.logs.lock().unwrap().get(session_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        self.logs
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        self.logs
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| switchboard::Error::History(format!("no session '{}'", session_id)))
    }
}

pub fn settings(mode: PermissionMode) -> SessionSettings {
    SessionSettings {
        provider: "claude".into(),
        model: "claude-sonnet-4-5".into(),
        permission_mode: mode,
    }
}

/// Everything a controller test needs, wired together
pub struct Harness {
    pub owner: OwnerKey,
    pub controller: Arc<SessionController>,
    pub launcher: Arc<ScriptedLauncher>,
    pub coordinator: Arc<DecisionCoordinator>,
    pub history: Arc<MemoryHistory>,
    pub ui: Arc<RecordingUi>,
}

impl Harness {
    pub fn new(mode: PermissionMode) -> Self {
        Self::with_history(mode, MemoryHistory::default())
    }

    pub fn with_history(mode: PermissionMode, history: MemoryHistory) -> Self {
        let config = Config::default();
        let owner = OwnerKey::new("window-1");
        let launcher = Arc::new(ScriptedLauncher::default());
        let coordinator = Arc::new(DecisionCoordinator::new(config.decision_timeout()));
        let history = Arc::new(history);
        let ui = Arc::new(RecordingUi::default());

        let controller = Arc::new(SessionController::new(
            owner.clone(),
            Session::new("/tmp/project", settings(mode)),
            SessionOptions::from_config(&config),
            SessionServices {
                launcher: launcher.clone(),
                coordinator: Arc::clone(&coordinator),
                history: history.clone(),
                ui: ui.clone(),
            },
        ));

        Self {
            owner,
            controller,
            launcher,
            coordinator,
            history,
            ui,
        }
    }
}

pub fn tool_result(id: &str, content: serde_json::Value) -> WorkerEvent {
    WorkerEvent::ToolResult {
        tool_use_id: id.into(),
        content,
        is_error: false,
    }
}

pub fn tool_use(id: &str, name: &str) -> WorkerEvent {
    WorkerEvent::ToolUseSeen {
        id: Some(id.into()),
        name: name.into(),
        args: json!({"path": "src/lib.rs"}),
    }
}
