// UI envelope protocol
//
// Both directions use `name:payload` lines where payload is JSON. Names with
// the `console.` prefix carry frontend diagnostics, never commands.

use serde::Serialize;
use serde_json::Value;

pub const CONSOLE_PREFIX: &str = "console.";

/// Log level requested by a `console.*` envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    fn from_suffix(suffix: &str) -> Self {
        match suffix {
            "error" => ConsoleLevel::Error,
            "warn" => ConsoleLevel::Warn,
            "debug" | "trace" => ConsoleLevel::Debug,
            _ => ConsoleLevel::Info,
        }
    }
}

/// One inbound line from the UI
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Console { level: ConsoleLevel, message: String },
    Command { name: String, payload: Value },
}

/// Parse an inbound line. Returns `None` for blank lines or a missing name.
///
/// The payload is everything after the first `:`. It is parsed as JSON when
/// possible; otherwise it is passed through as a JSON string, since some
/// commands (e.g. `send_message:hello`) carry bare text.
pub fn parse_envelope(line: &str) -> Option<Envelope> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let (name, raw) = match line.split_once(':') {
        Some((name, raw)) => (name.trim(), raw),
        None => (line.trim(), ""),
    };
    if name.is_empty() {
        return None;
    }

    if let Some(suffix) = name.strip_prefix(CONSOLE_PREFIX) {
        let message = match serde_json::from_str::<Value>(raw) {
            Ok(Value::String(s)) => s,
            _ => raw.to_string(),
        };
        return Some(Envelope::Console {
            level: ConsoleLevel::from_suffix(suffix),
            message,
        });
    }

    let payload = if raw.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    };

    Some(Envelope::Command {
        name: name.to_string(),
        payload,
    })
}

/// Format an outbound event line (without trailing newline)
pub fn encode_event(name: &str, payload: &impl Serialize) -> serde_json::Result<String> {
    Ok(format!("{}:{}", name, serde_json::to_string(payload)?))
}
