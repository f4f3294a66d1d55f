// Events pushed from the core to the UI surface

use super::model::{Message, SessionSettings};
use crate::decision::DecisionRequest;
use crate::protocol::encode_event;
use crate::streaming::{StreamingUpdate, UpdateSink};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Error,
}

/// Everything the UI can be told. Serialized as `name:payload` lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum UiEvent {
    /// Coalesced snapshot of the in-progress assistant message
    StreamUpdate(StreamingUpdate),

    /// Full replacement of the visible message list
    #[serde(rename_all = "camelCase")]
    Messages {
        session_id: String,
        messages: Vec<Message>,
    },

    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: String,
        settings: SessionSettings,
    },

    #[serde(rename_all = "camelCase")]
    SettingsChanged {
        session_id: String,
        settings: SessionSettings,
    },

    Status {
        level: StatusLevel,
        message: String,
    },

    /// Whether a turn is in flight (drives the "generating" indicator)
    #[serde(rename_all = "camelCase")]
    Busy {
        session_id: String,
        busy: bool,
    },

    PermissionRequest(DecisionRequest),

    QuestionRequest(DecisionRequest),

    #[serde(rename_all = "camelCase")]
    DecisionWithdrawn {
        channel_id: String,
    },

    SlashCommands {
        commands: Vec<String>,
    },
}

impl UiEvent {
    pub fn info(message: impl Into<String>) -> Self {
        UiEvent::Status {
            level: StatusLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        UiEvent::Status {
            level: StatusLevel::Error,
            message: message.into(),
        }
    }

    /// `name:payload` line for the UI transport
    pub fn to_line(&self) -> serde_json::Result<String> {
        let value = serde_json::to_value(self)?;
        let name = value.get("event").and_then(|v| v.as_str()).unwrap_or("unknown");
        let payload = value.get("payload").cloned().unwrap_or_default();
        encode_event(name, &payload)
    }
}

/// Outbound UI channel of one window. Must not block.
pub trait UiSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Feeds coalesced stream updates into a window's UI sink
pub struct UiUpdateSink(pub Arc<dyn UiSink>);

impl UpdateSink for UiUpdateSink {
    fn push_update(&self, update: StreamingUpdate) {
        self.0.emit(UiEvent::StreamUpdate(update));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let line = UiEvent::error("worker crashed").to_line().unwrap();
        assert_eq!(line, r#"status:{"level":"error","message":"worker crashed"}"#);
    }

    #[test]
    fn test_busy_line_uses_camel_case() {
        let line = UiEvent::Busy {
            session_id: "s1".into(),
            busy: true,
        }
        .to_line()
        .unwrap();
        let (name, payload) = line.split_once(':').unwrap();
        assert_eq!(name, "busy");
        let payload: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(payload, serde_json::json!({"sessionId": "s1", "busy": true}));
    }
}
