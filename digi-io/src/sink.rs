//! Consumers of processed events.

use crate::Result;
use digi_actions::EventOutcome;
use digi_core::{ContainerSummary, RecordKind, SequenceFailure};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Receives every event after its whole action tree completed.
pub trait EventSink {
    /// Consumes one processed event.
    ///
    /// # Errors
    /// Returns the write failure.
    fn consume(&mut self, outcome: &EventOutcome) -> Result<()>;

    /// Flushes buffered output at the end of a run.
    ///
    /// # Errors
    /// Returns the flush failure.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn consume(&mut self, _outcome: &EventOutcome) -> Result<()> {
        Ok(())
    }
}

/// One container line of an [`EventSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLine {
    pub name: String,
    pub kind: RecordKind,
    pub len: usize,
}

impl From<ContainerSummary> for ContainerLine {
    fn from(summary: ContainerSummary) -> Self {
        Self {
            name: summary.name,
            kind: summary.kind,
            len: summary.len,
        }
    }
}

/// JSON summary written per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub event_number: u64,
    pub timestamp_ns: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Failures reported along the path to the first one.
    #[serde(default)]
    pub failures: usize,
    /// Failed sequences, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_sequences: Vec<SequenceFailure>,
    pub elapsed_us: u64,
    pub issues: usize,
    pub containers: Vec<ContainerLine>,
}

impl EventSummary {
    /// Summarizes `outcome`.
    ///
    /// # Errors
    /// Fails if a container is still borrowed by an action.
    pub fn from_outcome(outcome: &EventOutcome) -> Result<Self> {
        let failure = outcome.failure();
        let (failures, failed_sequences) = failure
            .as_ref()
            .map_or((0, Vec::new()), |f| (f.count, f.sequences.clone()));
        let containers = outcome
            .store
            .summary()?
            .into_iter()
            .map(ContainerLine::from)
            .collect();
        Ok(Self {
            event_number: outcome.context.event_number,
            timestamp_ns: outcome.context.timestamp_ns,
            ok: outcome.is_ok(),
            error: outcome.result.as_ref().err().map(ToString::to_string),
            error_kind: failure.map(|f| format!("{:?}", f.kind)),
            failures,
            failed_sequences,
            elapsed_us: u64::try_from(outcome.elapsed.as_micros()).unwrap_or(u64::MAX),
            issues: outcome.store.issues().len(),
            containers,
        })
    }
}

/// Writes one JSON [`EventSummary`] per line.
pub struct JsonLinesDump<W: Write> {
    writer: W,
    written: u64,
}

impl JsonLinesDump<BufWriter<File>> {
    /// Creates the output file.
    ///
    /// # Errors
    /// Fails if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesDump<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Number of summaries written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesDump<W> {
    fn consume(&mut self, outcome: &EventOutcome) -> Result<()> {
        let summary = EventSummary::from_outcome(outcome)?;
        serde_json::to_writer(&mut self.writer, &summary)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
