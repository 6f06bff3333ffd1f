//! Event streaming layer.
//!
//! Events flow from producers (executor, security pipeline, trigger daemon)
//! through the [`EventBus`] to sinks (null, append-only NDJSON file,
//! fan-out). Emission never blocks the producer: each sink owns a bounded
//! queue drained by its own task; on overflow the oldest event is dropped
//! and counted.

mod bus;

pub use bus::{Event, EventBus, EventSink, FanoutSink, FileSink, NullSink, Topic};
