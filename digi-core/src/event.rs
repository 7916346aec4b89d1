//! Event identity.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity and lifecycle scope of one unit of digitization work.
///
/// Created by the pipeline driver for each event and never mutated; every
/// action of the event sees the same context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventContext {
    /// Sequence number of the event within the run.
    pub event_number: u64,
    /// Event timestamp in nanoseconds.
    pub timestamp_ns: u64,
}

impl EventContext {
    /// Creates a new event context.
    #[inline]
    #[must_use]
    pub fn new(event_number: u64, timestamp_ns: u64) -> Self {
        Self {
            event_number,
            timestamp_ns,
        }
    }
}

impl std::fmt::Display for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event #{} @ {} ns", self.event_number, self.timestamp_ns)
    }
}
