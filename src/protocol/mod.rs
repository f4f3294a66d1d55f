// Wire protocols
//
// worker  : JSON-per-line stream between the bridge and the worker subprocess
// envelope: `name:payload` lines between the core and the UI surface
// truncate: head+tail truncation of oversized tool results

pub mod envelope;
pub mod truncate;
pub mod worker;

pub use envelope::{encode_event, parse_envelope, ConsoleLevel, Envelope, CONSOLE_PREFIX};
pub use truncate::{truncate_content, truncate_payload};
pub use worker::{parse_decision_file, parse_worker_line, Attachment, TurnInput, WorkerCommand, WorkerEvent};
