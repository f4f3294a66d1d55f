// Turn bookkeeping
//
// A worker runs at most one turn at a time. `TurnTracker` holds the event
// sender of the in-flight turn and a watch flag that interrupt callers wait
// on; `TurnStream` is the consumer end handed back from `send`.

use crate::error::{Error, Result};
use crate::protocol::WorkerEvent;
use futures::Stream;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Events of one turn, ending with exactly one terminal event
/// (`TurnEnd` or `Crashed`).
pub struct TurnStream {
    turn_id: String,
    rx: mpsc::UnboundedReceiver<WorkerEvent>,
    done: bool,
}

impl TurnStream {
    /// A stream plus the sender that feeds it
    pub fn channel(turn_id: impl Into<String>) -> (mpsc::UnboundedSender<WorkerEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            turn_id: turn_id.into(),
            rx,
            done: false,
        };
        (tx, stream)
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }
}

impl Stream for TurnStream {
    type Item = WorkerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.done = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Producer vanished without settling; never leave the consumer hanging.
                self.done = true;
                Poll::Ready(Some(WorkerEvent::Crashed("worker event stream closed".to_string())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ActiveTurn {
    turn_id: String,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

/// In-flight turn of one worker
pub struct TurnTracker {
    current: Mutex<Option<ActiveTurn>>,
    busy: watch::Sender<bool>,
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTracker {
    pub fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            current: Mutex::new(None),
            busy,
        }
    }

    /// Claim the turn slot. Fails with `BusyConflict` if a turn is in flight.
    pub fn begin(&self, session_id: &str, turn_id: &str) -> Result<TurnStream> {
        let mut current = self.lock();
        if current.is_some() {
            return Err(Error::BusyConflict(session_id.to_string()));
        }

        let (events, stream) = TurnStream::channel(turn_id);
        *current = Some(ActiveTurn {
            turn_id: turn_id.to_string(),
            events,
        });
        self.busy.send_replace(true);
        Ok(stream)
    }

    /// Forward an event to the in-flight turn. Terminal events settle it.
    ///
    /// Returns false when no turn is in flight (the event is dropped).
    pub fn deliver(&self, event: WorkerEvent) -> bool {
        if event.is_terminal() {
            return self.settle(event);
        }

        let current = self.lock();
        match current.as_ref() {
            Some(turn) => {
                // A dropped stream only means nobody is listening any more.
                let _ = turn.events.send(event);
                true
            }
            None => {
                debug!(event = ?event, "Worker event outside a turn dropped");
                false
            }
        }
    }

    /// End the in-flight turn with a terminal event. Idempotent: returns
    /// false if there was nothing to settle.
    pub fn settle(&self, event: WorkerEvent) -> bool {
        debug_assert!(event.is_terminal());
        let Some(turn) = self.lock().take() else {
            return false;
        };

        debug!(turn_id = %turn.turn_id, event = ?event, "Turn settled");
        let _ = turn.events.send(event);
        self.busy.send_replace(false);
        true
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Wait until no turn is in flight. Returns false if `grace` elapsed first.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let mut rx = self.busy.subscribe();
        let settled = tokio::time::timeout(grace, rx.wait_for(|busy| !*busy)).await;
        matches!(settled, Ok(Ok(_)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveTurn>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Turn tracker lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}
