// Streaming update types and the consumer-side ordering guard

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// What triggered a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    ContentDelta,
    ThinkingDelta,
    ToolEvent,
    /// Final flush of a turn
    End,
}

/// Cumulative state of the in-progress assistant message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub content: String,
    pub thinking: String,
    pub tool_events: Vec<Value>,
}

/// One UI push. `payload` is a full snapshot, so a consumer only ever needs
/// the highest sequence it has seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingUpdate {
    pub session_id: String,
    pub sequence: u64,
    pub kind: UpdateKind,
    pub payload: MessageSnapshot,
}

/// Receiver of coalesced updates. Called with the coalescer's state locked,
/// so implementations must not block.
pub trait UpdateSink: Send + Sync {
    fn push_update(&self, update: StreamingUpdate);
}

/// Tracks the last applied sequence per session and rejects anything that
/// is not newer.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    last: HashMap<String, u64>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, session_id: &str, sequence: u64) -> bool {
        let last = self.last.entry(session_id.to_string()).or_insert(0);
        if sequence <= *last {
            debug!(session_id = session_id, sequence = sequence, last = *last, "Stale update rejected");
            return false;
        }
        *last = sequence;
        true
    }

    pub fn last(&self, session_id: &str) -> Option<u64> {
        self.last.get(session_id).copied()
    }

    /// Forget a session (after it is replaced)
    pub fn forget(&mut self, session_id: &str) {
        self.last.remove(session_id);
    }
}
