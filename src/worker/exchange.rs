// File-exchange decision transport
//
// The worker drops `request-<id>.json` into `<exchange_dir>/<session_id>/`.
// The poller claims each file by deleting it once it parses, and the answer is
// written as `response-<id>.json` via a temp file and rename so the worker
// never observes a partial response.

use super::transport::DecisionTransport;
use crate::decision::{DecisionRequest, DecisionResponse};
use crate::error::{Error, Result};
use crate::protocol::parse_decision_file;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const REQUEST_PREFIX: &str = "request-";
const RESPONSE_PREFIX: &str = "response-";

/// How long an unparseable request file may sit before it is discarded
const ABANDON_AFTER: Duration = Duration::from_secs(30);

pub struct FileExchange {
    dir: PathBuf,
    abandon_after: Duration,
}

impl FileExchange {
    pub fn new(root: &Path, session_id: &str) -> Self {
        Self {
            dir: root.join(session_id),
            abandon_after: ABANDON_AFTER,
        }
    }

    pub fn with_abandon_after(mut self, abandon_after: Duration) -> Self {
        self.abandon_after = abandon_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Claim every complete request file, oldest first. A file that does not
    /// parse is left in place until it is older than the abandon threshold.
    pub async fn claim_requests(&self) -> Result<Vec<DecisionRequest>> {
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(REQUEST_PREFIX) && name.ends_with(".json")) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, entry.path()));
        }
        found.sort();

        let mut requests = Vec::with_capacity(found.len());
        for (modified, path) in found {
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    debug!(path = %path.display(), "Skipping unreadable request file: {}", e);
                    continue;
                }
            };

            match parse_decision_file(&contents) {
                Ok(request) => {
                    if let Err(e) = fs::remove_file(&path).await {
                        debug!(path = %path.display(), "Request file already claimed: {}", e);
                        continue;
                    }
                    requests.push(request);
                }
                Err(e) => {
                    // Usually the worker is still writing it; retried next tick.
                    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
                    if age < self.abandon_after {
                        debug!(path = %path.display(), "Request file not complete yet: {}", e);
                        continue;
                    }
                    warn!(path = %path.display(), age_secs = age.as_secs(), "Discarding malformed request file: {}", e);
                    if let Err(e) = fs::remove_file(&path).await {
                        debug!(path = %path.display(), "Malformed request file already gone: {}", e);
                    }
                }
            }
        }

        Ok(requests)
    }

    /// Poll the exchange directory until `cancel` fires, handing every
    /// claimed request to `on_request`.
    pub fn spawn_poller<F>(self: Arc<Self>, interval: Duration, cancel: CancellationToken, on_request: F) -> JoinHandle<()>
    where
        F: Fn(DecisionRequest) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            info!(dir = %self.dir.display(), "Decision exchange poller started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.claim_requests().await {
                            Ok(requests) => requests.into_iter().for_each(&on_request),
                            Err(e) => warn!(dir = %self.dir.display(), "Polling decision exchange failed: {}", e),
                        }
                    }
                }
            }

            debug!(dir = %self.dir.display(), "Decision exchange poller stopped");
        })
    }

    fn response_path(&self, channel_id: &str) -> Result<PathBuf> {
        let safe = !channel_id.is_empty()
            && channel_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !safe || channel_id.contains("..") {
            return Err(Error::MalformedEvent(format!(
                "channel id '{}' is not usable as a file name",
                channel_id
            )));
        }
        Ok(self.dir.join(format!("{}{}.json", RESPONSE_PREFIX, channel_id)))
    }
}

#[async_trait]
impl DecisionTransport for FileExchange {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn reply(&self, response: &DecisionResponse) -> Result<()> {
        let path = self.response_path(&response.channel_id)?;
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, serde_json::to_vec(response)?).await?;
        fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "Wrote decision response");
        Ok(())
    }
}
