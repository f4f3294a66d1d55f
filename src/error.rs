// Error taxonomy for the coordination core
//
// Transport and parse failures are recovered where they happen; the variants
// here are the ones that cross a component boundary.

use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The worker subprocess died or its output stream ended mid-turn.
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    /// No human response arrived in time.
    #[error("decision timed out after {}s", .0.as_secs())]
    DecisionTimeout(Duration),

    /// A decision request named a tenant with no registration.
    #[error("no decision presenter registered for window '{0}'")]
    RoutingGap(String),

    /// A second turn was submitted while one is in flight.
    #[error("session {0} already has a turn in flight")]
    BusyConflict(String),

    /// A line of worker output that could not be parsed.
    #[error("malformed worker event: {0}")]
    MalformedEvent(String),

    /// The owning window was disposed while the request was pending.
    #[error("window '{0}' was torn down")]
    TornDown(String),

    /// Two handlers were registered under the same command name.
    #[error("command handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("failed to launch worker '{program}': {source}")]
    WorkerLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker i/o failed: {0}")]
    WorkerIo(#[from] std::io::Error),

    #[error("history store: {0}")]
    History(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short status line for the UI.
    pub fn user_message(&self) -> String {
        match self {
            Error::WorkerCrashed(reason) => format!("The agent process stopped unexpectedly: {}", reason),
            Error::BusyConflict(_) => "A response is still being generated. Interrupt it first.".to_string(),
            Error::WorkerLaunch { program, .. } => format!("Could not start the agent process ({})", program),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_timeout_message_uses_seconds() {
        let err = Error::DecisionTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "decision timed out after 60s");
    }

    #[test]
    fn test_user_message_for_crash_names_reason() {
        let err = Error::WorkerCrashed("exit status: 137".to_string());
        assert!(err.user_message().contains("exit status: 137"));
    }
}
