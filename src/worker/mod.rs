// Worker bridge
//
// The session talks to its agent worker through `WorkerBridge`; the
// subprocess implementation lives in `process`, decision transports in
// `transport` and `exchange`.

mod exchange;
mod process;
mod transport;
mod turn;

pub use exchange::FileExchange;
pub use process::{
    LaunchSpec, ProcessLauncher, WorkerProcess, ENV_DECISION_DIR, ENV_MODEL, ENV_PERMISSION_MODE,
    ENV_PROVIDER, ENV_SESSION_ID,
};
pub use transport::{CommandWriter, DecisionTransport, ReplyRoutes, StdioTransport};
pub use turn::{TurnStream, TurnTracker};

use crate::decision::DecisionResponse;
use crate::error::Result;
use crate::protocol::TurnInput;
use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;

/// Handle to one session's worker
#[async_trait]
pub trait WorkerBridge: Send + Sync {
    fn session_id(&self) -> &str;

    /// Start a turn. Fails with `BusyConflict` if one is already in flight.
    async fn send(&self, input: TurnInput) -> Result<TurnStream>;

    /// Ask the worker to stop the in-flight turn and wait (bounded) for it to
    /// settle. Returns immediately when idle.
    async fn interrupt(&self) -> Result<()>;

    /// Deliver a decision response over the transport its request came on.
    /// Returns false if no request with that channel id is outstanding.
    async fn respond(&self, response: DecisionResponse) -> Result<bool>;

    /// Kill the worker; any in-flight turn settles as interrupted
    async fn terminate(&self);

    fn is_busy(&self) -> bool;
}

/// Creates the worker for a session
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn start(&self, session: &Session) -> Result<Arc<dyn WorkerBridge>>;
}
