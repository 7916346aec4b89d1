//! digi-io: Event input, output and the event loop.
//!
//! Sources produce the initial containers of each event, sinks receive
//! every processed event, and [`run_events`] drives a pipeline between
//! the two.
//!

pub mod driver;
mod error;
pub mod sink;
pub mod source;

pub use driver::{run_events, EventFailure, RunSummary};
pub use error::{Error, Result};
pub use sink::{ContainerLine, EventSink, EventSummary, JsonLinesDump, NullSink};
pub use source::{EventRecord, EventSource, JsonLinesSource, MemorySource, SyntheticSource};
