// Streaming coalescer
//
// Turns a high-frequency delta stream into at most one UI push per interval.
// A delta flushes immediately when the interval since the last flush has
// passed; otherwise a single deferred flush is armed for the remainder.

use super::update::{MessageSnapshot, StreamingUpdate, UpdateKind, UpdateSink};
use crate::session::SequenceCounter;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A piece of streamed output
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Content(String),
    Thinking(String),
    /// Tool use or tool result, already in its UI shape
    Tool(Value),
}

impl StreamDelta {
    fn kind(&self) -> UpdateKind {
        match self {
            StreamDelta::Content(_) => UpdateKind::ContentDelta,
            StreamDelta::Thinking(_) => UpdateKind::ThinkingDelta,
            StreamDelta::Tool(_) => UpdateKind::ToolEvent,
        }
    }
}

#[derive(Default)]
struct State {
    snapshot: MessageSnapshot,
    kind: Option<UpdateKind>,
    dirty: bool,
    open: bool,
    /// Bumped per turn so a stale timer can't flush into the next turn
    generation: u64,
    last_flush: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    session_id: String,
    interval: Duration,
    sequence: Arc<SequenceCounter>,
    sink: Arc<dyn UpdateSink>,
    state: Mutex<State>,
}

pub struct StreamCoalescer {
    inner: Arc<Inner>,
}

impl StreamCoalescer {
    pub fn new(
        session_id: impl Into<String>,
        interval: Duration,
        sequence: Arc<SequenceCounter>,
        sink: Arc<dyn UpdateSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                interval,
                sequence,
                sink,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Reset the buffer and accept deltas for a new turn
    pub fn begin_turn(&self) {
        let mut state = self.inner.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let generation = state.generation + 1;
        *state = State {
            open: true,
            generation,
            ..State::default()
        };
    }

    pub fn push(&self, delta: StreamDelta) {
        let mut state = self.inner.lock();
        if !state.open {
            trace!(session_id = %self.inner.session_id, "Delta after finish ignored");
            return;
        }

        state.kind = Some(delta.kind());
        match delta {
            StreamDelta::Content(text) => state.snapshot.content.push_str(&text),
            StreamDelta::Thinking(text) => state.snapshot.thinking.push_str(&text),
            StreamDelta::Tool(event) => state.snapshot.tool_events.push(event),
        }
        state.dirty = true;

        let now = Instant::now();
        let elapsed = state.last_flush.map(|at| now.saturating_duration_since(at));
        match elapsed {
            Some(elapsed) if elapsed < self.inner.interval => {
                if state.timer.is_none() {
                    let remaining = self.inner.interval - elapsed;
                    let generation = state.generation;
                    state.timer = Some(self.arm(remaining, generation));
                }
            }
            _ => self.inner.flush_locked(&mut state, None),
        }
    }

    /// Flush unconditionally with kind `end` and close the stream.
    ///
    /// `final_message` is used as the content when no content deltas arrived.
    /// Returns the final snapshot.
    pub fn finish(&self, final_message: Option<&str>) -> MessageSnapshot {
        let mut state = self.inner.lock();
        if !state.open {
            debug!(session_id = %self.inner.session_id, "Finish on a closed stream");
        }
        if state.snapshot.content.is_empty() {
            if let Some(message) = final_message {
                state.snapshot.content.push_str(message);
            }
        }

        self.inner.flush_locked(&mut state, Some(UpdateKind::End));
        state.open = false;
        state.snapshot.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Content accumulated so far in the current turn
    pub fn snapshot(&self) -> MessageSnapshot {
        self.inner.lock().snapshot.clone()
    }

    fn arm(&self, delay: Duration, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = inner.lock();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            if state.open && state.dirty {
                inner.flush_locked(&mut state, None);
            }
        })
    }
}

impl Drop for StreamCoalescer {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(session_id = %self.session_id, "Coalescer lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn flush_locked(&self, state: &mut State, kind: Option<UpdateKind>) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let kind = kind.or(state.kind).unwrap_or(UpdateKind::ContentDelta);
        let update = StreamingUpdate {
            session_id: self.session_id.clone(),
            sequence: self.sequence.next(),
            kind,
            payload: state.snapshot.clone(),
        };
        state.dirty = false;
        state.last_flush = Some(Instant::now());

        trace!(session_id = %self.session_id, sequence = update.sequence, kind = ?kind, "Flushing update");
        self.sink.push_update(update);
    }
}
