// Streaming output: delta coalescing on the producer side and sequence
// ordering on the consumer side.

mod coalescer;
mod update;

pub use coalescer::{StreamCoalescer, StreamDelta};
pub use update::{MessageSnapshot, SequenceGuard, StreamingUpdate, UpdateKind, UpdateSink};
