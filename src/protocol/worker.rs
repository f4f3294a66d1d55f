// Worker wire protocol
//
// The worker reads one JSON command per line on stdin and writes one JSON
// event per line on stdout. Both directions use a `type` tag.

use crate::decision::{DecisionKind, DecisionRequest, DecisionResponse, Question};
use crate::error::{Error, Result};
use crate::session::PermissionMode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Events the bridge delivers for an in-flight turn
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    ContentDelta(String),
    ThinkingDelta(String),
    ToolUseSeen {
        id: Option<String>,
        name: String,
        args: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
    DecisionNeeded(DecisionRequest),
    TurnEnd {
        final_message: Option<String>,
        interrupted: bool,
    },
    Crashed(String),
}

impl WorkerEvent {
    /// Whether this event settles the turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::TurnEnd { .. } | WorkerEvent::Crashed(_))
    }

    pub fn interrupted() -> Self {
        WorkerEvent::TurnEnd {
            final_message: None,
            interrupted: true,
        }
    }
}

/// Decision request as the worker writes it, on stdout or as an exchange file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDecision {
    id: String,
    kind: DecisionKind,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    inputs: Value,
    #[serde(default)]
    questions: Vec<Question>,
}

impl From<WireDecision> for DecisionRequest {
    fn from(wire: WireDecision) -> Self {
        DecisionRequest {
            channel_id: wire.id,
            kind: wire.kind,
            tool_name: wire.tool_name,
            inputs: wire.inputs,
            questions: wire.questions,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    ContentDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    DecisionRequest(WireDecision),
    TurnEnd {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        interrupted: bool,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Parse one line of worker stdout.
///
/// Returns `Ok(None)` for blank lines and event types this side doesn't
/// consume; `Err(MalformedEvent)` for anything that isn't a valid event.
pub fn parse_worker_line(line: &str) -> Result<Option<WorkerEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let wire: WireEvent = serde_json::from_str(line).map_err(|e| {
        Error::MalformedEvent(format!("{} (line: {})", e, preview(line)))
    })?;

    let event = match wire {
        WireEvent::ContentDelta { text } => WorkerEvent::ContentDelta(text),
        WireEvent::ThinkingDelta { text } => WorkerEvent::ThinkingDelta(text),
        WireEvent::ToolUse { id, name, input } => WorkerEvent::ToolUseSeen { id, name, args: input },
        WireEvent::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => WorkerEvent::ToolResult {
            tool_use_id,
            content,
            is_error,
        },
        WireEvent::DecisionRequest(wire) => WorkerEvent::DecisionNeeded(wire.into()),
        WireEvent::TurnEnd { message, interrupted } => WorkerEvent::TurnEnd {
            final_message: message,
            interrupted,
        },
        WireEvent::Error { message } => WorkerEvent::Crashed(message),
        WireEvent::Unknown => {
            debug!(line = %preview(line), "Ignoring unknown worker event type");
            return Ok(None);
        }
    };

    Ok(Some(event))
}

/// Parse a decision request file written by the worker into the exchange
/// directory (the `decision_request` body without the `type` tag).
pub fn parse_decision_file(contents: &str) -> Result<DecisionRequest> {
    let wire: WireDecision = serde_json::from_str(contents)
        .map_err(|e| Error::MalformedEvent(format!("decision file: {}", e)))?;
    Ok(wire.into())
}

fn preview(line: &str) -> String {
    if line.chars().count() > 120 {
        format!("{}...", line.chars().take(120).collect::<String>())
    } else {
        line.to_string()
    }
}

/// A file attached to a user turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Base64 payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Everything the worker needs to run one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInput {
    pub turn_id: String,
    pub session_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub provider: String,
    pub model: String,
    pub permission_mode: PermissionMode,
}

/// Commands written to the worker's stdin
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    Turn(TurnInput),
    Interrupt,
    DecisionResponse(DecisionResponse),
}

impl WorkerCommand {
    /// Serialize as a single newline-terminated line
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
