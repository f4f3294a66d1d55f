// Session data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// How much the worker may do without asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask before any sensitive tool
    #[default]
    Default,
    /// File edits are pre-approved; everything else asks
    AcceptEdits,
    /// Read-only planning; mutating tools are refused
    Plan,
    /// Everything is pre-approved
    #[serde(alias = "bypassPermissions")]
    BypassAll,
}

impl PermissionMode {
    /// Spelling the worker CLI understands
    pub fn as_worker_flag(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassAll => "bypassPermissions",
        }
    }
}

/// Settings that survive session replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub provider: String,
    pub model: String,
    pub permission_mode: PermissionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Error,
}

/// One entry of the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Structured blocks (tool uses, tool results) as the worker sent them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_blocks: Vec<Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            raw_blocks: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, raw_blocks: Vec<Value>) -> Self {
        Self {
            raw_blocks,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content)
    }
}

/// Per-session monotonic counter stamped on every UI update
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    /// Allocate the next sequence number (first call returns 1)
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last allocated sequence number (0 if none)
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// One conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub working_directory: PathBuf,
    pub settings: SessionSettings,
    messages: Vec<Message>,
    sequence: Arc<SequenceCounter>,
}

impl Session {
    pub fn new(working_directory: impl Into<PathBuf>, settings: SessionSettings) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), working_directory, settings, Vec::new())
    }

    /// Rebuild a session around an existing log (history reload)
    pub fn with_id(
        id: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        settings: SessionSettings,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            id: id.into(),
            working_directory: working_directory.into(),
            settings,
            messages,
            sequence: Arc::new(SequenceCounter::default()),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Shared handle for components that stamp updates
    pub fn sequence(&self) -> Arc<SequenceCounter> {
        Arc::clone(&self.sequence)
    }

    /// Stamp updates from `sequence` instead of this session's own counter.
    ///
    /// A window reuses one counter for every session it shows, so a session
    /// id that comes back (history reload) never restarts below numbers the
    /// UI has already applied.
    pub fn with_sequence(mut self, sequence: Arc<SequenceCounter>) -> Self {
        self.sequence = sequence;
        self
    }

    /// A fresh session in the same directory with the same settings and an
    /// empty log
    pub fn successor(&self) -> Self {
        Self::new(self.working_directory.clone(), self.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings {
            provider: "claude".into(),
            model: "opus".into(),
            permission_mode: PermissionMode::AcceptEdits,
        }
    }

    #[test]
    fn test_sequence_is_strictly_increasing() {
        let counter = SequenceCounter::default();
        let values: Vec<u64> = (0..5).map(|_| counter.next()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert_eq!(counter.current(), 5);
    }

    #[test]
    fn test_successor_keeps_settings_drops_log() {
        let mut session = Session::new("/work", settings());
        session.push(Message::user("hi"));

        let next = session.successor();
        assert_ne!(next.id, session.id);
        assert!(next.messages().is_empty());
        assert_eq!(next.settings, session.settings);
        assert_eq!(next.working_directory(), Path::new("/work"));
    }

    #[test]
    fn test_with_sequence_shares_counter() {
        let shared = Arc::new(SequenceCounter::default());
        shared.next();
        shared.next();

        let reloaded = Session::with_id("s1", "/tmp", settings(), Vec::new()).with_sequence(Arc::clone(&shared));
        assert_eq!(reloaded.sequence().next(), 3);
        assert_eq!(shared.current(), 3);
    }

    #[test]
    fn test_permission_mode_spellings() {
        let mode: PermissionMode = serde_json::from_str("\"bypassPermissions\"").unwrap();
        assert_eq!(mode, PermissionMode::BypassAll);
        assert_eq!(serde_json::to_string(&PermissionMode::BypassAll).unwrap(), "\"bypassAll\"");
        assert_eq!(mode.as_worker_flag(), "bypassPermissions");
    }

    #[test]
    fn test_message_roles_serialize_lowercase() {
        let value = serde_json::to_value(Message::error("boom")).unwrap();
        assert_eq!(value["role"], "error");
        assert!(value.get("rawBlocks").is_none());
    }
}
