// Session controller
//
// One per window. Holds the current session, its worker and the task that
// consumes the in-flight turn. Lifecycle operations (send, interrupt, new
// session, history reload, close) are serialized through one async lock; the
// turn task itself never takes that lock, so interrupt can always wait for it.

use super::events::{UiEvent, UiSink, UiUpdateSink};
use super::history::HistoryStore;
use super::model::{Message, PermissionMode, SequenceCounter, Session, SessionSettings};
use super::permissions::{check_request, PermissionCheck};
use crate::config::Config;
use crate::decision::{DecisionCoordinator, DecisionRequest, DecisionResponse, DecisionTicket, OwnerKey};
use crate::error::{Error, Result};
use crate::protocol::{truncate_content, Attachment, TurnInput, WorkerEvent};
use crate::streaming::{StreamCoalescer, StreamDelta};
use crate::worker::{TurnStream, WorkerBridge, WorkerLauncher};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Tunables taken from the loaded configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub flush_interval: Duration,
    pub turn_timeout: Duration,
    pub payload_limit: usize,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            turn_timeout: config.turn_timeout(),
            payload_limit: config.session.payload_limit,
        }
    }
}

/// Shared collaborators of a window's session
#[derive(Clone)]
pub struct SessionServices {
    pub launcher: Arc<dyn WorkerLauncher>,
    pub coordinator: Arc<DecisionCoordinator>,
    pub history: Arc<dyn HistoryStore>,
    pub ui: Arc<dyn UiSink>,
}

struct Active {
    session: Arc<Mutex<Session>>,
    coalescer: Arc<StreamCoalescer>,
    worker: Option<Arc<dyn WorkerBridge>>,
    turn: Option<JoinHandle<()>>,
}

pub struct SessionController {
    owner: OwnerKey,
    /// Shared by every session this window installs
    sequence: Arc<SequenceCounter>,
    options: SessionOptions,
    services: SessionServices,
    active: Mutex<Active>,
}

impl SessionController {
    pub fn new(owner: OwnerKey, session: Session, options: SessionOptions, services: SessionServices) -> Self {
        let sequence = session.sequence();
        let coalescer = Arc::new(coalescer_for(&session, &options, &services));
        Self {
            owner,
            sequence,
            options,
            services,
            active: Mutex::new(Active {
                session: Arc::new(Mutex::new(session)),
                coalescer,
                worker: None,
                turn: None,
            }),
        }
    }

    pub fn owner(&self) -> &OwnerKey {
        &self.owner
    }

    pub async fn session_id(&self) -> String {
        let active = self.active.lock().await;
        let id = active.session.lock().await.id.clone();
        id
    }

    pub async fn settings(&self) -> SessionSettings {
        let active = self.active.lock().await;
        let settings = active.session.lock().await.settings.clone();
        settings
    }

    pub async fn messages(&self) -> Vec<Message> {
        let active = self.active.lock().await;
        let messages = active.session.lock().await.messages().to_vec();
        messages
    }

    pub async fn is_busy(&self) -> bool {
        let active = self.active.lock().await;
        turn_in_flight(&active)
    }

    /// Re-send the current session and its messages (UI reload)
    pub async fn announce(&self) {
        let active = self.active.lock().await;
        let session = active.session.lock().await;
        self.services.ui.emit(UiEvent::SessionCreated {
            session_id: session.id.clone(),
            settings: session.settings.clone(),
        });
        self.services.ui.emit(UiEvent::Messages {
            session_id: session.id.clone(),
            messages: session.messages().to_vec(),
        });
    }

    /// Append the user's message and start a turn.
    ///
    /// Fails with `BusyConflict` while a turn is in flight.
    #[instrument(skip(self, text, attachments), fields(owner = %self.owner))]
    pub async fn send(&self, text: &str, attachments: Vec<Attachment>) -> Result<()> {
        let mut active = self.active.lock().await;
        let (session_id, settings) = {
            let session = active.session.lock().await;
            (session.id.clone(), session.settings.clone())
        };
        if turn_in_flight(&active) {
            return Err(Error::BusyConflict(session_id));
        }

        let worker = match active.worker.clone() {
            Some(worker) => worker,
            None => {
                let snapshot = active.session.lock().await.clone();
                let worker = self.services.launcher.start(&snapshot).await?;
                active.worker = Some(Arc::clone(&worker));
                worker
            }
        };

        let input = TurnInput {
            turn_id: Uuid::new_v4().to_string(),
            session_id: session_id.clone(),
            prompt: text.to_string(),
            attachments,
            provider: settings.provider,
            model: settings.model,
            permission_mode: settings.permission_mode,
        };
        let turn_id = input.turn_id.clone();
        let stream = worker.send(input).await?;

        let user = Message::user(text);
        let messages = {
            let mut session = active.session.lock().await;
            session.push(user.clone());
            session.messages().to_vec()
        };
        if let Err(e) = self.services.history.append(&session_id, &user).await {
            warn!(session_id = %session_id, "Could not persist user message: {}", e);
        }

        self.services.ui.emit(UiEvent::Messages {
            session_id: session_id.clone(),
            messages,
        });
        self.services.ui.emit(UiEvent::Busy {
            session_id: session_id.clone(),
            busy: true,
        });

        info!(session_id = %session_id, turn_id = %turn_id, "Turn started");
        let runner = TurnRunner {
            owner: self.owner.clone(),
            session: Arc::clone(&active.session),
            session_id,
            worker,
            coalescer: Arc::clone(&active.coalescer),
            services: self.services.clone(),
            payload_limit: self.options.payload_limit,
            turn_timeout: self.options.turn_timeout,
        };
        active.turn = Some(tokio::spawn(runner.run(stream)));
        Ok(())
    }

    /// Stop the in-flight turn and wait until it is fully settled. Safe to
    /// call at any time, any number of times.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn interrupt(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        self.interrupt_locked(&mut active).await
    }

    /// Replace the session with an empty one carrying the same settings
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn create_new(&self) -> Result<String> {
        let mut active = self.active.lock().await;
        self.interrupt_locked(&mut active).await?;
        retire_worker(&mut active).await;

        let next = active.session.lock().await.successor();
        let session_id = next.id.clone();
        self.install(&mut active, next).await;
        info!(session_id = %session_id, "Created new session");
        Ok(session_id)
    }

    /// Resume a stored session. Settings come from the session being
    /// replaced, never from the stored log.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn load_history(&self, session_id: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        self.interrupt_locked(&mut active).await?;

        let messages = self.services.history.load(session_id).await?;
        let (working_directory, settings) = {
            let current = active.session.lock().await;
            (current.working_directory.clone(), current.settings.clone())
        };
        retire_worker(&mut active).await;

        let count = messages.len();
        self.install(
            &mut active,
            Session::with_id(session_id, working_directory, settings, messages),
        )
        .await;
        info!(session_id = session_id, messages = count, "Loaded session from history");
        Ok(())
    }

    pub async fn set_model(&self, model: &str) {
        self.update_settings(|settings| settings.model = model.to_string())
            .await
    }

    pub async fn set_provider(&self, provider: &str) {
        self.update_settings(|settings| settings.provider = provider.to_string())
            .await
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) {
        self.update_settings(|settings| settings.permission_mode = mode)
            .await
    }

    /// Interrupt and kill the worker (window disposal)
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn close(&self) {
        let mut active = self.active.lock().await;
        if let Err(e) = self.interrupt_locked(&mut active).await {
            warn!("Interrupt during close failed: {}", e);
        }
        retire_worker(&mut active).await;
        debug!("Session closed");
    }

    async fn interrupt_locked(&self, active: &mut Active) -> Result<()> {
        let Some(turn) = active.turn.take() else {
            return Ok(());
        };

        if let Some(worker) = active.worker.clone() {
            if let Err(e) = worker.interrupt().await {
                // Killing the worker settles the turn for certain.
                warn!("Interrupt failed, terminating worker: {}", e);
                retire_worker(active).await;
            }
        }

        if let Err(e) = turn.await {
            error!("Turn task ended abnormally: {}", e);
        }
        Ok(())
    }

    async fn install(&self, active: &mut Active, session: Session) {
        let session = session.with_sequence(Arc::clone(&self.sequence));
        self.services.ui.emit(UiEvent::SessionCreated {
            session_id: session.id.clone(),
            settings: session.settings.clone(),
        });
        self.services.ui.emit(UiEvent::Messages {
            session_id: session.id.clone(),
            messages: session.messages().to_vec(),
        });

        active.coalescer = Arc::new(coalescer_for(&session, &self.options, &self.services));
        active.session = Arc::new(Mutex::new(session));
    }

    async fn update_settings(&self, apply: impl FnOnce(&mut SessionSettings)) {
        let active = self.active.lock().await;
        let (session_id, settings) = {
            let mut session = active.session.lock().await;
            apply(&mut session.settings);
            (session.id.clone(), session.settings.clone())
        };
        debug!(session_id = %session_id, settings = ?settings, "Session settings changed");
        self.services.ui.emit(UiEvent::SettingsChanged { session_id, settings });
    }
}

fn turn_in_flight(active: &Active) -> bool {
    active.turn.as_ref().is_some_and(|turn| !turn.is_finished())
}

async fn retire_worker(active: &mut Active) {
    if let Some(worker) = active.worker.take() {
        worker.terminate().await;
    }
}

fn coalescer_for(session: &Session, options: &SessionOptions, services: &SessionServices) -> StreamCoalescer {
    StreamCoalescer::new(
        session.id.clone(),
        options.flush_interval,
        session.sequence(),
        Arc::new(UiUpdateSink(Arc::clone(&services.ui))),
    )
}

/// A decision either settled by policy or waiting on the window
enum Pending {
    Answered(DecisionResponse),
    Asked(DecisionTicket),
}

enum TurnOutcome {
    Completed(Option<String>),
    Interrupted(Option<String>),
    Crashed(String),
}

/// Consumes one turn's events
struct TurnRunner {
    owner: OwnerKey,
    session: Arc<Mutex<Session>>,
    session_id: String,
    worker: Arc<dyn WorkerBridge>,
    coalescer: Arc<StreamCoalescer>,
    services: SessionServices,
    payload_limit: usize,
    turn_timeout: Duration,
}

impl TurnRunner {
    async fn run(self, mut stream: TurnStream) {
        self.coalescer.begin_turn();

        let mut raw_blocks = Vec::new();
        let mut decisions = Vec::new();
        let mut outcome = TurnOutcome::Crashed("turn ended without a result".to_string());
        let mut timed_out = false;

        let deadline = tokio::time::sleep(self.turn_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = stream.next() => {
                    let Some(event) = event else { break };
                    match event {
                        WorkerEvent::ContentDelta(text) => self.coalescer.push(StreamDelta::Content(text)),
                        WorkerEvent::ThinkingDelta(text) => self.coalescer.push(StreamDelta::Thinking(text)),
                        WorkerEvent::ToolUseSeen { id, name, args } => {
                            let block = json!({"type": "tool_use", "id": id, "name": name, "input": args});
                            self.coalescer.push(StreamDelta::Tool(block.clone()));
                            raw_blocks.push(block);
                        }
                        WorkerEvent::ToolResult { tool_use_id, mut content, is_error } => {
                            if truncate_content(&mut content, self.payload_limit) > 0 {
                                debug!(tool_use_id = %tool_use_id, "Truncated oversized tool result");
                            }
                            let block = json!({
                                "type": "tool_result",
                                "tool_use_id": tool_use_id,
                                "content": content,
                                "is_error": is_error,
                            });
                            self.coalescer.push(StreamDelta::Tool(block.clone()));
                            raw_blocks.push(block);
                        }
                        WorkerEvent::DecisionNeeded(request) => {
                            decisions.push(request.channel_id.clone());
                            let mode = self.session.lock().await.settings.permission_mode;
                            self.spawn_decision(request, mode);
                        }
                        WorkerEvent::TurnEnd { final_message, interrupted } => {
                            outcome = if interrupted || timed_out {
                                TurnOutcome::Interrupted(final_message)
                            } else {
                                TurnOutcome::Completed(final_message)
                            };
                        }
                        WorkerEvent::Crashed(reason) => outcome = TurnOutcome::Crashed(reason),
                    }
                }
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    warn!(session_id = %self.session_id, timeout_secs = self.turn_timeout.as_secs(), "Turn timed out; interrupting");
                    if let Err(e) = self.worker.interrupt().await {
                        warn!("Interrupt after turn timeout failed: {}", e);
                    }
                }
            }
        }

        self.settle(outcome, raw_blocks, decisions, timed_out).await;
    }

    fn spawn_decision(&self, request: DecisionRequest, mode: PermissionMode) {
        let coordinator = Arc::clone(&self.services.coordinator);
        let worker = Arc::clone(&self.worker);
        let ui = Arc::clone(&self.services.ui);

        // Admit before returning so the cancel at settle always finds it.
        let channel_id = request.channel_id.clone();
        let decided = match check_request(mode, &request) {
            PermissionCheck::Allow => Pending::Answered(DecisionResponse::allow(channel_id)),
            PermissionCheck::Deny(reason) => Pending::Answered(DecisionResponse::deny(channel_id, reason)),
            PermissionCheck::AskUser => Pending::Asked(coordinator.submit(&self.owner, request)),
        };

        tokio::spawn(async move {
            let response = match decided {
                Pending::Answered(response) => response,
                Pending::Asked(ticket) => coordinator.wait(ticket).await,
            };

            if response.is_timeout() {
                let reason = Error::DecisionTimeout(coordinator.timeout()).user_message();
                ui.emit(UiEvent::error(format!("{}; the request was denied", reason)));
            }
            match worker.respond(response).await {
                Ok(true) => {}
                Ok(false) => debug!("Worker no longer waiting for this decision"),
                Err(e) => warn!("Could not deliver decision to worker: {}", e),
            }
        });
    }

    async fn settle(
        self,
        outcome: TurnOutcome,
        raw_blocks: Vec<serde_json::Value>,
        decisions: Vec<String>,
        timed_out: bool,
    ) {
        let final_message = match &outcome {
            TurnOutcome::Completed(message) | TurnOutcome::Interrupted(message) => message.clone(),
            TurnOutcome::Crashed(_) => None,
        };
        let snapshot = self.coalescer.finish(final_message.as_deref());

        let mut appended = Vec::new();
        if !snapshot.content.is_empty() || !raw_blocks.is_empty() {
            appended.push(Message::assistant(snapshot.content, raw_blocks));
        }

        match &outcome {
            TurnOutcome::Completed(_) => info!(session_id = %self.session_id, "Turn completed"),
            TurnOutcome::Interrupted(_) => info!(session_id = %self.session_id, "Turn interrupted"),
            TurnOutcome::Crashed(reason) => {
                error!(session_id = %self.session_id, reason = %reason, "Turn ended by worker crash");
                let text = Error::WorkerCrashed(reason.clone()).user_message();
                self.services.ui.emit(UiEvent::error(text.clone()));
                appended.push(Message::error(text));
            }
        }
        if timed_out {
            let text = format!(
                "The response took longer than {}s and was stopped",
                self.turn_timeout.as_secs()
            );
            self.services.ui.emit(UiEvent::error(text.clone()));
            appended.push(Message::error(text));
        }

        let messages = {
            let mut session = self.session.lock().await;
            for message in &appended {
                session.push(message.clone());
            }
            session.messages().to_vec()
        };
        for message in &appended {
            if let Err(e) = self.services.history.append(&self.session_id, message).await {
                warn!(session_id = %self.session_id, "Could not persist message: {}", e);
            }
        }

        // Requests the turn can no longer use
        for channel_id in &decisions {
            self.services.coordinator.cancel(&self.owner, channel_id);
        }

        self.services.ui.emit(UiEvent::Messages {
            session_id: self.session_id.clone(),
            messages,
        });
        self.services.ui.emit(UiEvent::Busy {
            session_id: self.session_id,
            busy: false,
        });
    }
}
