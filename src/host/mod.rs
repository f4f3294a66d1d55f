// Host
//
// Owns the process-wide pieces (configuration, decision coordinator, worker
// launcher, history store) and the set of open windows. Each window is a
// tenant: its own session controller, presenters, command table and UI sink.

mod handlers;

pub use handlers::{window_commands, UiPresenter, WindowLifecycle, SLASH_COMMANDS};

use crate::config::Config;
use crate::decision::{DecisionCoordinator, OwnerKey, TenantRegistration};
use crate::dispatch::{Dispatched, Dispatcher};
use crate::error::Result;
use crate::session::{
    HistoryStore, JsonlHistoryStore, Session, SessionController, SessionOptions, SessionServices, SessionSettings,
    UiEvent, UiSink,
};
use crate::worker::{ProcessLauncher, WorkerLauncher};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Host {
    config: Arc<Config>,
    coordinator: Arc<DecisionCoordinator>,
    launcher: Arc<dyn WorkerLauncher>,
    history: Arc<dyn HistoryStore>,
    windows: DashMap<OwnerKey, Arc<HostWindow>>,
}

impl Host {
    /// Host backed by real worker processes and the JSONL history store
    pub fn new(config: Arc<Config>) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(Arc::clone(&config)));
        let history = Arc::new(JsonlHistoryStore::new(config.history_dir.clone()));
        Self::with_parts(config, launcher, history)
    }

    pub fn with_parts(config: Arc<Config>, launcher: Arc<dyn WorkerLauncher>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            coordinator: Arc::new(DecisionCoordinator::new(config.decision_timeout())),
            config,
            launcher,
            history,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<DecisionCoordinator> {
        &self.coordinator
    }

    pub fn window(&self, owner: &OwnerKey) -> Option<Arc<HostWindow>> {
        self.windows.get(owner).map(|w| Arc::clone(w.value()))
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Attach a window: fresh session, presenters registered under `owner`,
    /// command table built. Re-opening an owner replaces its registration
    /// and closes the previous window's session.
    pub async fn open_window(
        &self,
        owner: impl Into<OwnerKey>,
        working_directory: impl Into<PathBuf>,
        ui: Arc<dyn UiSink>,
    ) -> Result<Arc<HostWindow>> {
        let owner = owner.into();
        let settings = SessionSettings {
            provider: self.config.session.provider.clone(),
            model: self.config.session.model.clone(),
            permission_mode: self.config.session.permission_mode,
        };
        let session = Session::new(working_directory, settings);
        let session_id = session.id.clone();

        let controller = Arc::new(SessionController::new(
            owner.clone(),
            session,
            SessionOptions::from_config(&self.config),
            SessionServices {
                launcher: Arc::clone(&self.launcher),
                coordinator: Arc::clone(&self.coordinator),
                history: Arc::clone(&self.history),
                ui: Arc::clone(&ui),
            },
        ));

        let registry = window_commands(&owner, &controller, &self.coordinator, &ui)?;
        let dispatcher = Dispatcher::new(registry)
            .with_lifecycle(Arc::new(WindowLifecycle::new(Arc::clone(&controller), Arc::clone(&ui))));

        let presenter = Arc::new(UiPresenter::new(Arc::clone(&ui)));
        self.coordinator
            .register(TenantRegistration::single(owner.clone(), presenter));

        let window = Arc::new(HostWindow {
            owner: owner.clone(),
            controller,
            dispatcher,
            ui,
        });
        if let Some(previous) = self.windows.insert(owner.clone(), Arc::clone(&window)) {
            warn!(owner = %owner, "Window re-opened; closing the previous session");
            previous.controller.close().await;
        }

        info!(owner = %owner, session_id = %session_id, "Window opened");
        Ok(window)
    }

    /// Dispose a window: fail its pending decisions, stop its worker
    pub async fn close_window(&self, owner: &OwnerKey) {
        let Some((_, window)) = self.windows.remove(owner) else {
            return;
        };

        // The closing turn cancels its own requests while still registered.
        window.controller.close().await;
        let failed = self.coordinator.unregister(owner);
        info!(owner = %owner, failed_decisions = failed, "Window closed");
    }

    pub async fn shutdown(&self) {
        let owners: Vec<OwnerKey> = self.windows.iter().map(|w| w.key().clone()).collect();
        for owner in owners {
            self.close_window(&owner).await;
        }
    }
}

pub struct HostWindow {
    owner: OwnerKey,
    controller: Arc<SessionController>,
    dispatcher: Dispatcher,
    ui: Arc<dyn UiSink>,
}

impl HostWindow {
    pub fn owner(&self) -> &OwnerKey {
        &self.owner
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Route one inbound UI line. Handler failures become error status
    /// events for this window.
    pub async fn handle_line(&self, line: &str) -> Dispatched {
        match self.dispatcher.dispatch_line(line).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(owner = %self.owner, "Command failed: {}", e);
                self.ui.emit(UiEvent::error(e.user_message()));
                Dispatched::Failed(e.to_string())
            }
        }
    }
}
