// Project-wide constants
//
// Defaults for every value the core reads from configuration at startup.
// Import via `use crate::config::constants::*;`.

/// Program launched as the worker subprocess when no config overrides it.
pub const DEFAULT_WORKER_PROGRAM: &str = "switchboard-worker";

/// Interval between coalesced UI pushes.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 50;

/// How long a decision may wait for a human before it resolves as denied.
///
/// The worker applies the same bound on its side of the exchange.
pub const DEFAULT_DECISION_TIMEOUT_SECS: u64 = 60;

/// Polling cadence for the file-based decision exchange.
pub const DEFAULT_EXCHANGE_POLL_MS: u64 = 100;

/// Upper bound on a single turn.
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 600;

/// Time the worker gets to settle a turn after an interrupt before the
/// bridge settles it locally.
pub const DEFAULT_INTERRUPT_GRACE_MS: u64 = 3_000;

/// Consecutive unparseable lines tolerated before the turn is ended.
pub const DEFAULT_MAX_MALFORMED_EVENTS: u32 = 5;

/// Tool-result payloads longer than this (in characters) are truncated.
pub const DEFAULT_PAYLOAD_LIMIT: usize = 20_000;

pub const DEFAULT_PROVIDER: &str = "claude";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Directory under the home directory holding config, history and exchange.
pub const APP_DIR_NAME: &str = ".switchboard";
