// Worker subprocess bridge
//
// One `WorkerProcess` per session. It owns the child process, a stdout reader
// task that turns lines into `WorkerEvent`s for the in-flight turn, a stderr
// drain, and optionally the file-exchange poller. The process is relaunched
// on the next `send` after it exits; a failed turn is never retried.

use super::exchange::FileExchange;
use super::transport::{CommandWriter, DecisionTransport, ReplyRoutes, StdioTransport};
use super::turn::{TurnStream, TurnTracker};
use super::{WorkerBridge, WorkerLauncher};
use crate::config::Config;
use crate::decision::DecisionResponse;
use crate::error::{Error, Result};
use crate::protocol::{parse_worker_line, TurnInput, WorkerCommand, WorkerEvent};
use crate::session::{Session, SessionSettings};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const ENV_SESSION_ID: &str = "SWITCHBOARD_SESSION_ID";
pub const ENV_DECISION_DIR: &str = "SWITCHBOARD_DECISION_DIR";
pub const ENV_PERMISSION_MODE: &str = "SWITCHBOARD_PERMISSION_MODE";
pub const ENV_MODEL: &str = "SWITCHBOARD_MODEL";
pub const ENV_PROVIDER: &str = "SWITCHBOARD_PROVIDER";

/// Everything needed to (re)launch the worker for one session
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_directory: PathBuf,
    pub session_id: String,
    pub settings: SessionSettings,
    /// Root of the decision exchange; the session's directory lives below it
    pub exchange_root: PathBuf,
    /// Poll interval when the file exchange is enabled
    pub exchange_poll: Option<Duration>,
    pub interrupt_grace: Duration,
    pub max_malformed_events: u32,
}

impl LaunchSpec {
    pub fn for_session(config: &Config, session: &Session) -> Self {
        Self {
            program: config.worker.program.clone(),
            args: config.worker.args.clone(),
            env: config.worker.env.clone(),
            working_directory: session.working_directory().to_path_buf(),
            session_id: session.id.clone(),
            settings: session.settings.clone(),
            exchange_root: config.decision.exchange_dir.clone(),
            exchange_poll: config.decision.file_exchange.then(|| config.poll_interval()),
            interrupt_grace: config.interrupt_grace(),
            max_malformed_events: config.worker.max_malformed_events,
        }
    }

    fn decision_dir(&self) -> PathBuf {
        self.exchange_root.join(&self.session_id)
    }
}

struct Running {
    pid: Option<u32>,
    kill: CancellationToken,
    reader: JoinHandle<()>,
}

pub struct WorkerProcess {
    spec: LaunchSpec,
    writer: Arc<CommandWriter>,
    turns: Arc<TurnTracker>,
    routes: Arc<ReplyRoutes>,
    stdio: Arc<dyn DecisionTransport>,
    running: Mutex<Option<Running>>,
    /// Fired by `terminate`; stops the exchange poller and refuses new turns
    shutdown: CancellationToken,
}

impl WorkerProcess {
    /// Launch the worker (and the exchange poller when enabled)
    #[instrument(skip(spec), fields(session_id = %spec.session_id, program = %spec.program))]
    pub async fn start(spec: LaunchSpec) -> Result<Arc<Self>> {
        let writer = Arc::new(CommandWriter::new());
        let worker = Arc::new(Self {
            stdio: Arc::new(StdioTransport::new(Arc::clone(&writer))),
            writer,
            turns: Arc::new(TurnTracker::new()),
            routes: Arc::new(ReplyRoutes::new()),
            running: Mutex::new(None),
            shutdown: CancellationToken::new(),
            spec,
        });

        if let Some(interval) = worker.spec.exchange_poll {
            worker.start_exchange(interval).await?;
        }

        let launched = worker.spawn_process().await;
        match launched {
            Ok(running) => *worker.running.lock().await = Some(running),
            Err(e) => {
                worker.shutdown.cancel();
                return Err(e);
            }
        }

        Ok(worker)
    }

    /// Whether the child process is currently alive
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.reader.is_finished())
    }

    pub async fn pid(&self) -> Option<u32> {
        self.running.lock().await.as_ref().and_then(|running| running.pid)
    }

    async fn start_exchange(&self, interval: Duration) -> Result<()> {
        let exchange = Arc::new(FileExchange::new(&self.spec.exchange_root, &self.spec.session_id));
        exchange.prepare().await?;

        let transport: Arc<dyn DecisionTransport> = exchange.clone();
        let turns = Arc::clone(&self.turns);
        let routes = Arc::clone(&self.routes);

        exchange.spawn_poller(interval, self.shutdown.child_token(), move |request| {
            let channel_id = request.channel_id.clone();
            routes.insert(&channel_id, Arc::clone(&transport));
            if !turns.deliver(WorkerEvent::DecisionNeeded(request)) {
                let routes = Arc::clone(&routes);
                tokio::spawn(async move {
                    refuse_outside_turn(&routes, channel_id).await;
                });
            }
        });
        Ok(())
    }

    async fn spawn_process(&self) -> Result<Running> {
        let spec = &self.spec;
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .env(ENV_SESSION_ID, &spec.session_id)
            .env(ENV_DECISION_DIR, spec.decision_dir())
            .env(ENV_PERMISSION_MODE, spec.settings.permission_mode.as_worker_flag())
            .env(ENV_MODEL, &spec.settings.model)
            .env(ENV_PROVIDER, &spec.settings.provider)
            .current_dir(&spec.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| Error::WorkerLaunch {
            program: spec.program.clone(),
            source,
        })?;

        let missing = |pipe: &str| Error::WorkerCrashed(format!("worker {} was not piped", pipe));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        self.writer.attach(stdin).await;

        let pid = child.id();
        info!(pid = ?pid, session_id = %spec.session_id, "Worker started");

        // Drain stderr so a chatty worker never blocks on a full pipe
        let session_id = spec.session_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(session_id = %session_id, "worker stderr: {}", line);
            }
        });

        let kill = CancellationToken::new();
        let reader = tokio::spawn(
            EventReader {
                session_id: spec.session_id.clone(),
                turns: Arc::clone(&self.turns),
                routes: Arc::clone(&self.routes),
                stdio: Arc::clone(&self.stdio),
                max_malformed: spec.max_malformed_events,
                kill: kill.clone(),
            }
            .run(child, stdout),
        );

        Ok(Running { pid, kill, reader })
    }

    /// Relaunch the process if it has exited since the last turn
    async fn ensure_running(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        let alive = running.as_ref().is_some_and(|r| !r.reader.is_finished());
        if !alive {
            if running.is_some() {
                info!(session_id = %self.spec.session_id, "Relaunching worker");
            }
            *running = Some(self.spawn_process().await?);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerBridge for WorkerProcess {
    fn session_id(&self) -> &str {
        &self.spec.session_id
    }

    #[instrument(skip(self, input), fields(session_id = %self.spec.session_id, turn_id = %input.turn_id))]
    async fn send(&self, input: TurnInput) -> Result<TurnStream> {
        if self.shutdown.is_cancelled() {
            return Err(Error::WorkerCrashed("worker was terminated".to_string()));
        }
        if self.turns.is_busy() {
            return Err(Error::BusyConflict(self.spec.session_id.clone()));
        }

        self.ensure_running().await?;
        let stream = self.turns.begin(&self.spec.session_id, &input.turn_id)?;

        if let Err(e) = self.writer.write(&WorkerCommand::Turn(input)).await {
            error!(session_id = %self.spec.session_id, "Could not deliver turn to worker: {}", e);
            self.turns
                .settle(WorkerEvent::Crashed(format!("could not deliver turn: {}", e)));
        }

        Ok(stream)
    }

    #[instrument(skip(self), fields(session_id = %self.spec.session_id))]
    async fn interrupt(&self) -> Result<()> {
        if !self.turns.is_busy() {
            return Ok(());
        }

        if let Err(e) = self.writer.write(&WorkerCommand::Interrupt).await {
            warn!("Could not send interrupt to worker: {}", e);
        }

        if !self.turns.wait_idle(self.spec.interrupt_grace).await {
            warn!(
                grace_ms = self.spec.interrupt_grace.as_millis() as u64,
                "Worker did not settle the turn in time; settling locally"
            );
            self.turns.settle(WorkerEvent::interrupted());
        }
        Ok(())
    }

    async fn respond(&self, response: DecisionResponse) -> Result<bool> {
        self.routes.reply(&response).await
    }

    #[instrument(skip(self), fields(session_id = %self.spec.session_id))]
    async fn terminate(&self) {
        self.shutdown.cancel();

        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.kill.cancel();
            if let Err(e) = running.reader.await {
                warn!("Worker reader task failed: {}", e);
            }
        }

        self.writer.detach().await;
        self.turns.settle(WorkerEvent::interrupted());
        self.routes.clear();
        info!("Worker terminated");
    }

    fn is_busy(&self) -> bool {
        self.turns.is_busy()
    }
}

/// Stdout reader for one process lifetime
struct EventReader {
    session_id: String,
    turns: Arc<TurnTracker>,
    routes: Arc<ReplyRoutes>,
    stdio: Arc<dyn DecisionTransport>,
    max_malformed: u32,
    kill: CancellationToken,
}

impl EventReader {
    async fn run(self, mut child: Child, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        let mut malformed = 0u32;

        let reason = loop {
            tokio::select! {
                _ = self.kill.cancelled() => {
                    self.kill_child(&mut child).await;
                    return;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match parse_worker_line(&line) {
                        Ok(Some(event)) => {
                            malformed = 0;
                            self.dispatch(event).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            malformed += 1;
                            warn!(session_id = %self.session_id, count = malformed, "{}", e);
                            if malformed > self.max_malformed {
                                self.turns.settle(WorkerEvent::Crashed(format!(
                                    "{} consecutive malformed lines from worker",
                                    malformed
                                )));
                                malformed = 0;
                            }
                        }
                    },
                    Ok(None) => break "stdout closed".to_string(),
                    Err(e) => break format!("stdout read failed: {}", e),
                }
            }
        };

        let status = tokio::select! {
            _ = self.kill.cancelled() => {
                self.kill_child(&mut child).await;
                return;
            }
            status = child.wait() => match status {
                Ok(status) => status.to_string(),
                Err(e) => format!("unknown status: {}", e),
            }
        };

        let reason = format!("worker exited ({}): {}", status, reason);
        if self.turns.settle(WorkerEvent::Crashed(reason.clone())) {
            error!(session_id = %self.session_id, "{}", reason);
        } else {
            info!(session_id = %self.session_id, "{}", reason);
        }
    }

    async fn dispatch(&self, event: WorkerEvent) {
        let WorkerEvent::DecisionNeeded(request) = &event else {
            self.turns.deliver(event);
            return;
        };

        let channel_id = request.channel_id.clone();
        self.routes.insert(&channel_id, Arc::clone(&self.stdio));
        if !self.turns.deliver(event) {
            refuse_outside_turn(&self.routes, channel_id).await;
        }
    }

    async fn kill_child(&self, child: &mut Child) {
        if let Err(e) = child.kill().await {
            warn!(session_id = %self.session_id, "Failed to kill worker: {}", e);
        }
        self.turns.settle(WorkerEvent::interrupted());
    }
}

/// A decision request with no turn to attach to is denied straight away
async fn refuse_outside_turn(routes: &ReplyRoutes, channel_id: String) {
    warn!(channel_id = %channel_id, "Decision request outside a turn; denying");
    if let Err(e) = routes
        .reply(&DecisionResponse::deny(channel_id, "no turn in flight"))
        .await
    {
        warn!("Could not answer stray decision request: {}", e);
    }
}

/// Launches a `WorkerProcess` per session from the loaded configuration
pub struct ProcessLauncher {
    config: Arc<Config>,
}

impl ProcessLauncher {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn start(&self, session: &Session) -> Result<Arc<dyn WorkerBridge>> {
        let worker = WorkerProcess::start(LaunchSpec::for_session(&self.config, session)).await?;
        Ok(worker)
    }
}
