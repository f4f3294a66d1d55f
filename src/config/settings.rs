// Configuration structs

use super::constants::*;
use crate::session::PermissionMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How the worker subprocess is launched and supervised
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable to spawn (looked up on PATH)
    pub program: String,

    /// Extra arguments passed before any per-session flags
    pub args: Vec<String>,

    /// Extra environment for the worker
    pub env: HashMap<String, String>,

    /// Grace period for the worker to settle an interrupted turn
    pub interrupt_grace_ms: u64,

    /// Consecutive malformed lines tolerated before the turn ends as crashed
    pub max_malformed_events: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_WORKER_PROGRAM.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            interrupt_grace_ms: DEFAULT_INTERRUPT_GRACE_MS,
            max_malformed_events: DEFAULT_MAX_MALFORMED_EVENTS,
        }
    }
}

/// Decision exchange between worker and UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Root directory for file-based request/response exchange
    pub exchange_dir: PathBuf,

    /// Seconds before an unanswered decision resolves as denied
    pub timeout_secs: u64,

    /// Poll cadence for request files
    pub poll_interval_ms: u64,

    /// Watch `exchange_dir` for request files in addition to in-band requests
    pub file_exchange: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            exchange_dir: app_dir().join("decisions"),
            timeout_secs: DEFAULT_DECISION_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_EXCHANGE_POLL_MS,
            file_exchange: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Minimum spacing between UI pushes while a turn streams
    pub flush_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

/// Defaults for new sessions and per-turn limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub provider: String,
    pub model: String,
    pub permission_mode: PermissionMode,
    pub turn_timeout_secs: u64,
    /// Tool-result payloads above this many characters are truncated
    pub payload_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            permission_mode: PermissionMode::Default,
            turn_timeout_secs: DEFAULT_TURN_TIMEOUT_SECS,
            payload_limit: DEFAULT_PAYLOAD_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub decision: DecisionConfig,
    pub streaming: StreamingConfig,
    pub session: SessionConfig,

    /// Directory for per-session JSONL history logs
    pub history_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            decision: DecisionConfig::default(),
            streaming: StreamingConfig::default(),
            session: SessionConfig::default(),
            history_dir: app_dir().join("history"),
        }
    }
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker.program.trim().is_empty() {
            anyhow::bail!("worker.program must not be empty");
        }

        if self.worker.max_malformed_events == 0 {
            anyhow::bail!("worker.max_malformed_events must be greater than 0");
        }

        if self.decision.timeout_secs == 0 {
            anyhow::bail!("decision.timeout_secs must be greater than 0");
        }

        if self.decision.poll_interval_ms == 0 {
            anyhow::bail!("decision.poll_interval_ms must be greater than 0");
        }

        if self.streaming.flush_interval_ms == 0 {
            anyhow::bail!("streaming.flush_interval_ms must be greater than 0");
        }

        if self.streaming.flush_interval_ms > 5_000 {
            anyhow::bail!(
                "streaming.flush_interval_ms ({}) is very high; recommended range is 16-500",
                self.streaming.flush_interval_ms
            );
        }

        if self.session.turn_timeout_secs == 0 {
            anyhow::bail!("session.turn_timeout_secs must be greater than 0");
        }

        // Room for a head, a tail and the marker.
        if self.session.payload_limit < 200 {
            anyhow::bail!(
                "session.payload_limit ({}) is too small; use at least 200",
                self.session.payload_limit
            );
        }

        Ok(())
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision.timeout_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.streaming.flush_interval_ms)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.session.turn_timeout_secs)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.worker.interrupt_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.decision.poll_interval_ms)
    }
}

/// `~/.switchboard`, or a directory under the system temp dir when there is
/// no home directory (service accounts, sandboxes).
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}
