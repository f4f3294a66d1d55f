// Command handler registry

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles one named UI command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<()>;
}

/// Adapter so a closure returning a boxed future can be registered directly
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    async fn handle(&self, payload: Value) -> Result<()> {
        (self.0)(payload).await
    }
}

/// Immutable name → handler table
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Default)]
pub struct CommandRegistryBuilder {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistryBuilder {
    /// Add a handler. A name can only be registered once.
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(Error::DuplicateHandler(name));
        }
        self.handlers.insert(name, handler);
        Ok(self)
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            handlers: self.handlers,
        }
    }
}
