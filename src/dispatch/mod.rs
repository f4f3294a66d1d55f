// UI command dispatch

mod dispatcher;
mod registry;

pub use dispatcher::{
    Dispatched, Dispatcher, LifecycleHooks, CREATE_NEW_SESSION, FRONTEND_READY, REFRESH_SLASH_COMMANDS,
};
pub use registry::{CommandHandler, CommandRegistry, CommandRegistryBuilder, FnHandler};
