//! Error types for disc demuxing and indexing.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for all library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for demuxing, navigation and indexing.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying file layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unrecognised container syntax.
    #[error("format error: {0}")]
    Format(String),

    /// A section or header claims more bytes than are available.
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncation {
        what: &'static str,
        need: usize,
        have: usize,
    },

    /// Offset outside all known ranges or beyond the mapped data.
    #[error("offset {offset} out of bounds (limit {limit})")]
    Bounds { offset: u64, limit: u64 },

    /// A structural assumption did not hold; the optional step was declined.
    #[error("integrity assumption violated: {0}")]
    Integrity(String),

    /// A bounded read did not complete in time.
    #[error("read at offset {offset} timed out")]
    Timeout { offset: u64 },

    /// No read slot became available in time.
    #[error("read backpressure: {in_flight} reads in flight")]
    Backpressure { in_flight: usize },

    /// The file handle went stale and could not be reopened.
    #[error("stale handle for {0}")]
    StaleHandle(PathBuf),
}

impl Error {
    /// Create a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create an integrity error.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn bounds(offset: u64, limit: u64) -> Self {
        Self::Bounds { offset, limit }
    }

    /// I/O-layer conditions that get one reopen and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::StaleHandle(_) | Self::Timeout { .. } | Self::Backpressure { .. })
    }
}
