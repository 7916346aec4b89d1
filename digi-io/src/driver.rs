//! Event loop connecting a source, the pipeline and a sink.

use crate::sink::EventSink;
use crate::source::EventSource;
use crate::Result;
use digi_actions::Pipeline;
use digi_core::{ErrorKind, EventContext, SequenceFailure};
use std::time::{Duration, Instant};

/// One failed event of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFailure {
    pub event_number: u64,
    pub kind: ErrorKind,
    pub first: String,
    pub count: usize,
    /// Failed sequences, outermost first.
    pub sequences: Vec<SequenceFailure>,
}

/// Totals of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Events taken from the source, failed ones included.
    pub processed: u64,
    pub failed: u64,
    pub failures: Vec<EventFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.processed - self.failed
    }

    fn record(&mut self, failure: EventFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

/// Pulls events from `source` until it is exhausted or `max_events` were
/// taken, runs each through `pipeline` and hands the outcome to `sink`.
///
/// A failed event is recorded and the run continues with the next one.
/// Events the source could not decode count as failures too.
///
/// # Errors
/// Returns I/O failures of the source or the sink.
pub fn run_events(
    pipeline: &Pipeline,
    source: &mut dyn EventSource,
    sink: &mut dyn EventSink,
    max_events: Option<u64>,
) -> Result<RunSummary> {
    let started = Instant::now();
    let mut summary = RunSummary::default();

    while max_events.map_or(true, |max| summary.processed < max) {
        let timestamp_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let ctx = EventContext::new(summary.processed, timestamp_ns);
        let store = match source.next(&ctx) {
            Ok(store) => store,
            Err(err) if err.is_end_of_input() => break,
            Err(err) if err.is_event_local() => {
                log::error!("{ctx}: unreadable input: {err}");
                summary.processed += 1;
                summary.record(EventFailure {
                    event_number: ctx.event_number,
                    kind: ErrorKind::Input,
                    first: err.to_string(),
                    count: 1,
                    sequences: Vec::new(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        let outcome = pipeline.process_event(store);
        summary.processed += 1;
        if let Some(failure) = outcome.failure() {
            summary.record(EventFailure {
                event_number: ctx.event_number,
                kind: failure.kind,
                first: failure.first,
                count: failure.count,
                sequences: failure.sequences,
            });
        }
        sink.consume(&outcome)?;
    }

    sink.finish()?;
    summary.elapsed = started.elapsed();
    log::info!(
        "processed {} events ({} failed) in {:?}",
        summary.processed,
        summary.failed,
        summary.elapsed
    );
    Ok(summary)
}
