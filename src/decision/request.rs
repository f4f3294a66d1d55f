// Decision request/response types
//
// Shared by the worker wire protocol, the coordinator and the UI events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Reject message for a decision nobody answered in time.
pub const REJECT_TIMEOUT: &str = "timeout";

/// Reject message for a decision whose window went away.
pub const REJECT_TORN_DOWN: &str = "torn down";

/// What kind of human decision the worker is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    #[serde(alias = "toolPermission")]
    ToolPermission,
    #[serde(alias = "structuredQuestion")]
    StructuredQuestion,
}

/// One selectable answer to a structured question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single question inside a structured-question request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

/// A pending human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    /// Unique id correlating the request with its response
    pub channel_id: String,
    pub kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
}

impl DecisionRequest {
    pub fn tool_permission(channel_id: impl Into<String>, tool_name: impl Into<String>, inputs: Value) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind: DecisionKind::ToolPermission,
            tool_name: Some(tool_name.into()),
            inputs,
            questions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn structured_question(channel_id: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind: DecisionKind::StructuredQuestion,
            tool_name: None,
            inputs: Value::Null,
            questions,
            created_at: Utc::now(),
        }
    }
}

/// The human's answer (or the coordinator's answer on their behalf)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub channel_id: String,
    pub allow: bool,
    #[serde(default)]
    pub remember: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_message: Option<String>,
}

impl DecisionResponse {
    pub fn allow(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            allow: true,
            remember: false,
            answers: None,
            reject_message: None,
        }
    }

    pub fn deny(channel_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            allow: false,
            remember: false,
            answers: None,
            reject_message: Some(reason.into()),
        }
    }

    pub fn answered(channel_id: impl Into<String>, answers: HashMap<String, String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            allow: true,
            remember: false,
            answers: Some(answers),
            reject_message: None,
        }
    }

    pub fn timed_out(channel_id: impl Into<String>) -> Self {
        Self::deny(channel_id, REJECT_TIMEOUT)
    }

    pub fn torn_down(channel_id: impl Into<String>) -> Self {
        Self::deny(channel_id, REJECT_TORN_DOWN)
    }

    pub fn remembered(mut self) -> Self {
        self.remember = true;
        self
    }

    pub fn is_timeout(&self) -> bool {
        !self.allow && self.reject_message.as_deref() == Some(REJECT_TIMEOUT)
    }
}
