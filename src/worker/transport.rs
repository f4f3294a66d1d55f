// Decision transports
//
// A decision request reaches the bridge either as a stdout line or as a file
// in the exchange directory. The answer must go back the same way, so every
// request records its transport in `ReplyRoutes` under its channel id.

use crate::decision::DecisionResponse;
use crate::error::{Error, Result};
use crate::protocol::WorkerCommand;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Serialized writer for the worker's stdin. Swapped on relaunch.
#[derive(Default)]
pub struct CommandWriter {
    stdin: Mutex<Option<ChildStdin>>,
}

impl CommandWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, stdin: ChildStdin) {
        *self.stdin.lock().await = Some(stdin);
    }

    /// Drop the pipe (closes the worker's stdin)
    pub async fn detach(&self) {
        self.stdin.lock().await.take();
    }

    pub async fn write(&self, command: &WorkerCommand) -> Result<()> {
        let line = command.to_line()?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::WorkerCrashed("worker stdin is closed".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Carries a decision response back to the worker
#[async_trait]
pub trait DecisionTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reply(&self, response: &DecisionResponse) -> Result<()>;
}

/// Answers as `decision_response` lines on the worker's stdin
pub struct StdioTransport {
    writer: Arc<CommandWriter>,
}

impl StdioTransport {
    pub fn new(writer: Arc<CommandWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl DecisionTransport for StdioTransport {
    fn name(&self) -> &'static str {
        "stdio"
    }

    async fn reply(&self, response: &DecisionResponse) -> Result<()> {
        self.writer
            .write(&WorkerCommand::DecisionResponse(response.clone()))
            .await
    }
}

/// channel id → transport the request arrived on
#[derive(Default)]
pub struct ReplyRoutes {
    routes: DashMap<String, Arc<dyn DecisionTransport>>,
}

impl ReplyRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, channel_id: &str, transport: Arc<dyn DecisionTransport>) {
        if self.routes.insert(channel_id.to_string(), transport).is_some() {
            warn!(channel_id = channel_id, "Decision channel id reused by worker; keeping newest route");
        }
    }

    /// Send the response over its route. Each route is used once; returns
    /// false if the channel id is unknown.
    pub async fn reply(&self, response: &DecisionResponse) -> Result<bool> {
        let Some((_, transport)) = self.routes.remove(&response.channel_id) else {
            warn!(channel_id = %response.channel_id, "No reply route for decision response");
            return Ok(false);
        };

        debug!(channel_id = %response.channel_id, transport = transport.name(), "Replying to worker");
        transport.reply(response).await?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&self) {
        self.routes.clear();
    }
}
