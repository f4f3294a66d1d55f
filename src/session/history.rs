// Conversation history store
//
// The core only ever appends a message or reloads a whole log by session id.
// The default store keeps one JSONL file per session.

use super::model::Message;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one message to the session's log
    async fn append(&self, session_id: &str, message: &Message) -> Result<()>;

    /// Reload a session's log in order
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;
}

/// History store writing `<dir>/<session_id>.jsonl`
pub struct JsonlHistoryStore {
    dir: PathBuf,
}

impl JsonlHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::History(format!("invalid session id '{}'", session_id)));
        }
        Ok(self.dir.join(format!("{}.jsonl", session_id)))
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        let path = self.log_path(session_id)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::History(format!("failed to create {}: {}", self.dir.display(), e)))?;

        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::History(format!("failed to open {}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::History(format!("failed to write {}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| Error::History(format!("failed to flush {}: {}", path.display(), e)))?;

        debug!(session_id = session_id, "Appended message to history");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.log_path(session_id)?;
        let contents = fs::read_to_string(&path)
            .await
            .map_err(|e| Error::History(format!("no history for session {}: {}", session_id, e)))?;

        let mut messages = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(
                    session_id = session_id,
                    line = idx + 1,
                    "Skipping unreadable history entry: {}",
                    e
                ),
            }
        }

        Ok(messages)
    }
}
