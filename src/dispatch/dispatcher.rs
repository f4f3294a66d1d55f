// Inbound envelope dispatcher
//
// Registered handlers first, then the built-in lifecycle commands, then an
// "unknown command" log line. `console.*` envelopes are frontend log output
// and never reach a handler.

use super::registry::CommandRegistry;
use crate::error::Result;
use crate::protocol::{parse_envelope, ConsoleLevel, Envelope};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub const CREATE_NEW_SESSION: &str = "create_new_session";
pub const FRONTEND_READY: &str = "frontend_ready";
pub const REFRESH_SLASH_COMMANDS: &str = "refresh_slash_commands";

/// Built-in commands every window understands
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn create_new_session(&self) -> Result<()>;
    async fn frontend_ready(&self) -> Result<()>;
    async fn refresh_slash_commands(&self) -> Result<()>;
}

/// How an inbound line was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Handler(String),
    Lifecycle(String),
    Console,
    Unknown(String),
    /// The handler returned an error
    Failed(String),
    /// Blank or nameless line
    Ignored,
}

impl Dispatched {
    pub fn handled(&self) -> bool {
        matches!(self, Dispatched::Handler(_) | Dispatched::Lifecycle(_))
    }
}

pub struct Dispatcher {
    registry: CommandRegistry,
    lifecycle: Option<Arc<dyn LifecycleHooks>>,
}

impl Dispatcher {
    pub fn new(registry: CommandRegistry) -> Self {
        Self {
            registry,
            lifecycle: None,
        }
    }

    pub fn with_lifecycle(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.lifecycle = Some(hooks);
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Parse and route one `name:payload` line
    pub async fn dispatch_line(&self, line: &str) -> Result<Dispatched> {
        match parse_envelope(line) {
            None => Ok(Dispatched::Ignored),
            Some(Envelope::Console { level, message }) => {
                log_console(level, &message);
                Ok(Dispatched::Console)
            }
            Some(Envelope::Command { name, payload }) => self.dispatch(&name, payload).await,
        }
    }

    /// Route a command by name. Returns how it was handled; handler errors
    /// propagate.
    #[instrument(skip(self, payload))]
    pub async fn dispatch(&self, name: &str, payload: Value) -> Result<Dispatched> {
        if let Some(handler) = self.registry.get(name) {
            debug!(command = name, "Dispatching command");
            handler.handle(payload).await?;
            return Ok(Dispatched::Handler(name.to_string()));
        }

        if let Some(hooks) = &self.lifecycle {
            let handled = match name {
                CREATE_NEW_SESSION => Some(hooks.create_new_session().await),
                FRONTEND_READY => Some(hooks.frontend_ready().await),
                REFRESH_SLASH_COMMANDS => Some(hooks.refresh_slash_commands().await),
                _ => None,
            };
            if let Some(result) = handled {
                result?;
                return Ok(Dispatched::Lifecycle(name.to_string()));
            }
        }

        warn!(command = name, "Unknown command");
        Ok(Dispatched::Unknown(name.to_string()))
    }
}

fn log_console(level: ConsoleLevel, message: &str) {
    match level {
        ConsoleLevel::Error => error!(target: "switchboard::ui", "{}", message),
        ConsoleLevel::Warn => warn!(target: "switchboard::ui", "{}", message),
        ConsoleLevel::Info => info!(target: "switchboard::ui", "{}", message),
        ConsoleLevel::Debug => debug!(target: "switchboard::ui", "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::registry::{CommandHandler, FnHandler};
    use crate::error::Error;
    use futures::FutureExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        async fn handle(&self, payload: Value) -> Result<()> {
            self.calls.lock().unwrap().push(("handler".into(), payload));
            Ok(())
        }
    }

    #[async_trait]
    impl LifecycleHooks for Recorder {
        async fn create_new_session(&self) -> Result<()> {
            self.calls.lock().unwrap().push((CREATE_NEW_SESSION.into(), Value::Null));
            Ok(())
        }

        async fn frontend_ready(&self) -> Result<()> {
            self.calls.lock().unwrap().push((FRONTEND_READY.into(), Value::Null));
            Ok(())
        }

        async fn refresh_slash_commands(&self) -> Result<()> {
            self.calls.lock().unwrap().push((REFRESH_SLASH_COMMANDS.into(), Value::Null));
            Ok(())
        }
    }

    fn dispatcher(recorder: &Arc<Recorder>) -> Dispatcher {
        let registry = CommandRegistry::builder()
            .register("send_message", recorder.clone())
            .unwrap()
            .build();
        Dispatcher::new(registry).with_lifecycle(recorder.clone())
    }

    #[tokio::test]
    async fn test_registered_command_gets_payload() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(&recorder);

        let outcome = dispatcher.dispatch_line("send_message:hello there").await.unwrap();
        assert_eq!(outcome, Dispatched::Handler("send_message".into()));
        assert_eq!(
            recorder.calls.lock().unwrap()[0].1,
            Value::String("hello there".into())
        );
    }

    #[tokio::test]
    async fn test_lifecycle_fallback() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(&recorder);

        let outcome = dispatcher.dispatch_line("frontend_ready:").await.unwrap();
        assert!(outcome.handled());
        assert_eq!(recorder.calls.lock().unwrap()[0].0, FRONTEND_READY);
    }

    #[tokio::test]
    async fn test_console_is_never_dispatched() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(&recorder);

        let outcome = dispatcher
            .dispatch_line(r#"console.error:"Uncaught TypeError""#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::Console);
        // Even if someone registers the name.
        let registry = CommandRegistry::builder()
            .register("console.log", recorder.clone())
            .unwrap()
            .build();
        let outcome = Dispatcher::new(registry).dispatch_line("console.log:hi").await.unwrap();
        assert_eq!(outcome, Dispatched::Console);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_is_reported() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(&recorder);
        let outcome = dispatcher.dispatch("open_settings", Value::Null).await.unwrap();
        assert_eq!(outcome, Dispatched::Unknown("open_settings".into()));
        assert!(!outcome.handled());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let failing: Arc<dyn CommandHandler> = Arc::new(FnHandler(|_payload: Value| {
            async { Err(Error::History("boom".into())) }.boxed()
        }));
        let registry = CommandRegistry::builder()
            .register("load_history", failing)
            .unwrap()
            .build();
        let dispatcher = Dispatcher::new(registry);
        assert!(dispatcher.dispatch("load_history", Value::Null).await.is_err());
    }
}
