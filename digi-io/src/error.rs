//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON input or unserializable output.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input that parses but cannot form an event.
    #[error("invalid event at line {line}: {reason}")]
    InvalidEvent { line: usize, reason: String },

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] digi_core::Error),
}

impl Error {
    /// Returns true if the source has no more events.
    #[must_use]
    pub fn is_end_of_input(&self) -> bool {
        matches!(self, Self::Core(err) if err.is_end_of_input())
    }

    /// Returns true if the error concerns one event only and the run may go on.
    #[must_use]
    pub fn is_event_local(&self) -> bool {
        matches!(self, Self::Json(_) | Self::InvalidEvent { .. })
    }
}
