// Command handlers and decision presenters for one window

use crate::decision::{DecisionCoordinator, DecisionKind, DecisionPresenter, DecisionRequest, DecisionResponse, OwnerKey};
use crate::dispatch::{CommandHandler, CommandRegistry, LifecycleHooks};
use crate::error::{Error, Result};
use crate::protocol::Attachment;
use crate::session::{PermissionMode, SessionController, UiEvent, UiSink};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Commands typed into the prompt box that the host handles itself
pub const SLASH_COMMANDS: &[&str] = &["/new", "/model", "/provider", "/mode"];

/// Shows decision requests in the window's UI
pub struct UiPresenter {
    ui: Arc<dyn UiSink>,
}

impl UiPresenter {
    pub fn new(ui: Arc<dyn UiSink>) -> Self {
        Self { ui }
    }
}

impl DecisionPresenter for UiPresenter {
    fn present(&self, request: &DecisionRequest) {
        let event = match request.kind {
            DecisionKind::ToolPermission => UiEvent::PermissionRequest(request.clone()),
            DecisionKind::StructuredQuestion => UiEvent::QuestionRequest(request.clone()),
        };
        self.ui.emit(event);
    }

    fn withdraw(&self, channel_id: &str) {
        self.ui.emit(UiEvent::DecisionWithdrawn {
            channel_id: channel_id.to_string(),
        });
    }
}

/// Payloads arrive either as an object or, for single-value commands, as a
/// bare string.
fn string_field(payload: &Value, field: &str) -> Result<String> {
    match payload {
        Value::String(s) => Ok(s.clone()),
        Value::Object(map) => map
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::MalformedEvent(format!("missing '{}'", field))),
        other => Err(Error::MalformedEvent(format!("expected '{}', got {}", field, other))),
    }
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    text: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

pub struct SendMessage {
    controller: Arc<SessionController>,
}

#[async_trait]
impl CommandHandler for SendMessage {
    async fn handle(&self, payload: Value) -> Result<()> {
        let SendMessagePayload { text, attachments } = match payload {
            Value::String(text) => SendMessagePayload {
                text,
                attachments: Vec::new(),
            },
            other => serde_json::from_value(other)?,
        };

        let trimmed = text.trim();
        if trimmed.is_empty() && attachments.is_empty() {
            debug!("Ignoring empty message");
            return Ok(());
        }

        if let Some(handled) = self.slash_command(trimmed).await? {
            info!(command = handled, "Handled slash command");
            return Ok(());
        }

        self.controller.send(&text, attachments).await
    }
}

impl SendMessage {
    async fn slash_command(&self, text: &str) -> Result<Option<&'static str>> {
        let mut parts = text.splitn(2, char::is_whitespace);
        let Some(command) = parts.next().and_then(|c| SLASH_COMMANDS.iter().find(|known| **known == c)) else {
            return Ok(None);
        };
        let argument = parts.next().map(str::trim).unwrap_or_default();

        match (*command, argument) {
            ("/new", _) => {
                self.controller.create_new().await?;
            }
            ("/model", model) if !model.is_empty() => self.controller.set_model(model).await,
            ("/provider", provider) if !provider.is_empty() => self.controller.set_provider(provider).await,
            ("/mode", mode) if !mode.is_empty() => {
                let mode: PermissionMode = serde_json::from_value(Value::String(mode.to_string()))?;
                self.controller.set_permission_mode(mode).await;
            }
            // Missing argument: let the worker see it as text.
            _ => return Ok(None),
        }
        Ok(Some(*command))
    }
}

pub struct InterruptSession {
    controller: Arc<SessionController>,
}

#[async_trait]
impl CommandHandler for InterruptSession {
    async fn handle(&self, _payload: Value) -> Result<()> {
        self.controller.interrupt().await
    }
}

pub struct LoadHistory {
    controller: Arc<SessionController>,
}

#[async_trait]
impl CommandHandler for LoadHistory {
    async fn handle(&self, payload: Value) -> Result<()> {
        let session_id = string_field(&payload, "sessionId")?;
        self.controller.load_history(&session_id).await
    }
}

/// Which setting a `Set*` handler changes
#[derive(Debug, Clone, Copy)]
pub enum SettingField {
    Model,
    Provider,
    Mode,
}

pub struct SetSetting {
    controller: Arc<SessionController>,
    field: SettingField,
}

#[async_trait]
impl CommandHandler for SetSetting {
    async fn handle(&self, payload: Value) -> Result<()> {
        match self.field {
            SettingField::Model => {
                let model = string_field(&payload, "model")?;
                self.controller.set_model(&model).await;
            }
            SettingField::Provider => {
                let provider = string_field(&payload, "provider")?;
                self.controller.set_provider(&provider).await;
            }
            SettingField::Mode => {
                let mode = string_field(&payload, "mode")?;
                let mode: PermissionMode = serde_json::from_value(Value::String(mode))?;
                self.controller.set_permission_mode(mode).await;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionDecisionPayload {
    channel_id: String,
    allow: bool,
    #[serde(default)]
    remember: bool,
    #[serde(default)]
    reject_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionAnswerPayload {
    channel_id: String,
    #[serde(default)]
    answers: Option<HashMap<String, String>>,
}

/// `permission_decision` and `question_answer`: both resolve through the
/// coordinator, scoped to this window
pub struct ResolveDecision {
    owner: OwnerKey,
    coordinator: Arc<DecisionCoordinator>,
    ui: Arc<dyn UiSink>,
    kind: DecisionKind,
}

#[async_trait]
impl CommandHandler for ResolveDecision {
    async fn handle(&self, payload: Value) -> Result<()> {
        let response = match self.kind {
            DecisionKind::ToolPermission => {
                let decision: PermissionDecisionPayload = serde_json::from_value(payload)?;
                if decision.allow {
                    let response = DecisionResponse::allow(decision.channel_id);
                    if decision.remember {
                        response.remembered()
                    } else {
                        response
                    }
                } else {
                    let reason = decision
                        .reject_message
                        .unwrap_or_else(|| "denied by user".to_string());
                    DecisionResponse::deny(decision.channel_id, reason)
                }
            }
            DecisionKind::StructuredQuestion => {
                let answer: QuestionAnswerPayload = serde_json::from_value(payload)?;
                match answer.answers {
                    Some(answers) => DecisionResponse::answered(answer.channel_id, answers),
                    None => DecisionResponse::deny(answer.channel_id, "question dismissed"),
                }
            }
        };

        let channel_id = response.channel_id.clone();
        if !self.coordinator.resolve_for(&self.owner, response) {
            self.ui.emit(UiEvent::DecisionWithdrawn { channel_id });
            self.ui.emit(UiEvent::info("That request is no longer waiting for an answer"));
        }
        Ok(())
    }
}

/// Built-in lifecycle commands for a window
pub struct WindowLifecycle {
    controller: Arc<SessionController>,
    ui: Arc<dyn UiSink>,
}

#[async_trait]
impl LifecycleHooks for WindowLifecycle {
    async fn create_new_session(&self) -> Result<()> {
        self.controller.create_new().await.map(|_| ())
    }

    async fn frontend_ready(&self) -> Result<()> {
        self.controller.announce().await;
        self.refresh_slash_commands().await
    }

    async fn refresh_slash_commands(&self) -> Result<()> {
        self.ui.emit(UiEvent::SlashCommands {
            commands: SLASH_COMMANDS.iter().map(|c| c.to_string()).collect(),
        });
        Ok(())
    }
}

impl WindowLifecycle {
    pub fn new(controller: Arc<SessionController>, ui: Arc<dyn UiSink>) -> Self {
        Self { controller, ui }
    }
}

/// The command table of one window
pub fn window_commands(
    owner: &OwnerKey,
    controller: &Arc<SessionController>,
    coordinator: &Arc<DecisionCoordinator>,
    ui: &Arc<dyn UiSink>,
) -> Result<CommandRegistry> {
    let setting = |field| -> Arc<dyn CommandHandler> {
        Arc::new(SetSetting {
            controller: Arc::clone(controller),
            field,
        })
    };
    let resolve = |kind| -> Arc<dyn CommandHandler> {
        Arc::new(ResolveDecision {
            owner: owner.clone(),
            coordinator: Arc::clone(coordinator),
            ui: Arc::clone(ui),
            kind,
        })
    };

    let registry = CommandRegistry::builder()
        .register(
            "send_message",
            Arc::new(SendMessage {
                controller: Arc::clone(controller),
            }),
        )?
        .register(
            "interrupt_session",
            Arc::new(InterruptSession {
                controller: Arc::clone(controller),
            }),
        )?
        .register(
            "load_history",
            Arc::new(LoadHistory {
                controller: Arc::clone(controller),
            }),
        )?
        .register("set_model", setting(SettingField::Model))?
        .register("set_provider", setting(SettingField::Provider))?
        .register("set_mode", setting(SettingField::Mode))?
        .register("permission_decision", resolve(DecisionKind::ToolPermission))?
        .register("question_answer", resolve(DecisionKind::StructuredQuestion))?
        .build();

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_field_accepts_bare_string_or_object() {
        assert_eq!(string_field(&json!("opus"), "model").unwrap(), "opus");
        assert_eq!(string_field(&json!({"model": "haiku"}), "model").unwrap(), "haiku");
        assert!(string_field(&json!({"other": 1}), "model").is_err());
        assert!(string_field(&Value::Null, "model").is_err());
    }

    #[test]
    fn test_send_message_payload_shapes() {
        let payload: SendMessagePayload = serde_json::from_value(json!({
            "text": "look at this",
            "attachments": [{"fileName": "a.png", "mediaType": "image/png"}]
        }))
        .unwrap();
        assert_eq!(payload.attachments.len(), 1);
    }
}
