//! Error types for digi-core.

use crate::container::RecordKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for digitization operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types shared by every pipeline component.
#[derive(Error, Debug)]
pub enum Error {
    /// Misconfigured pipeline (bad parameters, unknown kinds, guard misuse).
    #[error("configuration error: {0}")]
    Config(String),

    /// A declared input container is absent from the event store.
    #[error("{action}: missing input container '{container}'")]
    MissingContainer { action: String, container: String },

    /// Records of a different kind were written under an existing name.
    #[error("container '{container}' holds {expected} records, got {found}")]
    RecordKindMismatch {
        container: String,
        expected: RecordKind,
        found: RecordKind,
    },

    /// Two actions touched the same container without partitioning or a guard.
    #[error("container '{container}' is already in use by another action")]
    ContainerBusy { container: String },

    /// Segmentation lookup failed for a record.
    #[error("cannot decode cell id {cell_id:#018x}: {reason}")]
    Decode { cell_id: u64, reason: String },

    /// A signal processor rejected a value.
    #[error("signal processor error: {0}")]
    Processor(#[from] ProcessorError),

    /// A guard or barrier wait exceeded its configured bound.
    #[error("timed out after {waited:?} waiting for {resource}")]
    ConcurrencyTimeout { resource: String, waited: Duration },

    /// Aggregated failure of an action sequence.
    #[error("sequence '{sequence}' failed{}: {first}", more(.additional))]
    Sequence {
        sequence: String,
        first: Box<Error>,
        additional: usize,
    },

    /// An action panicked; the panic was contained to its event.
    #[error("action '{action}' panicked: {message}")]
    ActionPanicked { action: String, message: String },

    /// A lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// The event source has no more data.
    #[error("no more events available")]
    EndOfInput,
}

/// Failures counted by one sequence on the path to the first failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceFailure {
    pub sequence: String,
    /// Failed children of this sequence.
    pub count: usize,
}

fn more(additional: &usize) -> String {
    if *additional == 0 {
        String::new()
    } else {
        format!(" (+{additional} more)")
    }
}

/// Errors raised by signal processors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    /// Invalid processor parameter (rejected at construction).
    #[error("{processor}: invalid parameter {parameter} = {value}")]
    InvalidParameter {
        processor: String,
        parameter: &'static str,
        value: f64,
    },

    /// A per-record input is outside the processor's domain.
    #[error("{processor}: {quantity} = {value} is out of range")]
    OutOfRange {
        processor: String,
        quantity: &'static str,
        value: f64,
    },

    /// Processor-specific rejection.
    #[error("{processor}: {reason}")]
    Rejected { processor: String, reason: String },
}

/// Coarse classification used for per-event reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Decode,
    Processor,
    ConcurrencyTimeout,
    Input,
    Internal,
}

impl Error {
    /// Builds a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classifies the root cause of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root_cause() {
            Self::Config(_)
            | Self::MissingContainer { .. }
            | Self::RecordKindMismatch { .. }
            | Self::ContainerBusy { .. } => ErrorKind::Configuration,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Processor(_) => ErrorKind::Processor,
            Self::ConcurrencyTimeout { .. } => ErrorKind::ConcurrencyTimeout,
            Self::EndOfInput => ErrorKind::Input,
            Self::Poisoned(_) | Self::ActionPanicked { .. } | Self::Sequence { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Follows nested sequence failures down to the originating error.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Self::Sequence { first, .. } = current {
            current = first;
        }
        current
    }

    /// Number of failures this error stands for at its own level.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        match self {
            Self::Sequence { additional, .. } => 1 + additional,
            _ => 1,
        }
    }

    /// Sequences from the outermost down to the one holding the first
    /// failure, each with its own failure count.
    #[must_use]
    pub fn sequence_path(&self) -> Vec<SequenceFailure> {
        let mut path = Vec::new();
        let mut current = self;
        while let Self::Sequence {
            sequence,
            first,
            additional,
        } = current
        {
            path.push(SequenceFailure {
                sequence: sequence.clone(),
                count: 1 + additional,
            });
            current = first;
        }
        path
    }

    /// Failures reported along the path to the first one.
    ///
    /// Each enclosing sequence adds its other failed children. A failed
    /// sibling subtree counts once even if it failed in several places.
    #[must_use]
    pub fn total_failures(&self) -> usize {
        1 + self
            .sequence_path()
            .iter()
            .map(|step| step.count - 1)
            .sum::<usize>()
    }

    /// Converts a caught panic payload into an error.
    #[must_use]
    pub fn from_panic(action: &str, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::ActionPanicked {
            action: action.to_string(),
            message,
        }
    }

    /// Returns true if this is an end-of-input signal.
    #[must_use]
    pub fn is_end_of_input(&self) -> bool {
        matches!(self, Self::EndOfInput)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_root_cause_and_kind() {
        let inner = Error::Sequence {
            sequence: "calo".into(),
            first: Box::new(Error::Decode {
                cell_id: 7,
                reason: "bits outside id spec".into(),
            }),
            additional: 0,
        };
        let outer = Error::Sequence {
            sequence: "main".into(),
            first: Box::new(inner),
            additional: 2,
        };

        assert_eq!(outer.kind(), ErrorKind::Decode);
        assert_eq!(outer.failure_count(), 3);
        assert!(matches!(outer.root_cause(), Error::Decode { cell_id: 7, .. }));
    }

    #[test]
    fn test_sequence_path_counts_nested_failures() {
        let inner = Error::Sequence {
            sequence: "subdetectors".into(),
            first: Box::new(Error::config("a failed")),
            additional: 2,
        };
        let outer = Error::Sequence {
            sequence: "digitize".into(),
            first: Box::new(inner),
            additional: 0,
        };

        assert_eq!(outer.failure_count(), 1);
        assert_eq!(outer.total_failures(), 3);
        assert_eq!(
            outer.sequence_path(),
            vec![
                SequenceFailure {
                    sequence: "digitize".into(),
                    count: 1
                },
                SequenceFailure {
                    sequence: "subdetectors".into(),
                    count: 3
                },
            ]
        );
        assert_eq!(Error::config("plain").total_failures(), 1);
        assert!(Error::config("plain").sequence_path().is_empty());
    }

    #[test]
    fn test_sequence_display_mentions_additional_failures() {
        let err = Error::Sequence {
            sequence: "main".into(),
            first: Box::new(Error::config("bad")),
            additional: 1,
        };
        let text = err.to_string();
        assert!(text.contains("(+1 more)"));
        assert!(text.contains("configuration error: bad"));

        let single = Error::Sequence {
            sequence: "main".into(),
            first: Box::new(Error::config("bad")),
            additional: 0,
        };
        assert!(!single.to_string().contains("more"));
    }
}
