//! Error types for Hulk

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for Hulk operations
pub type Result<T> = std::result::Result<T, HulkError>;

/// Errors that can occur in Hulk
///
/// A missing fixture is not represented here: it is the normal
/// [`Outcome::Absent`](crate::replay::Outcome::Absent) result.
#[derive(Debug, Error)]
pub enum HulkError {
    /// I/O error while reading or writing the fixture store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Origin answered with a non-success status
    #[error("Origin returned status {status} for {url}")]
    OriginStatus {
        /// HTTP status returned by the origin
        status: u16,
        /// URL that was fetched
        url: String,
    },

    /// Origin could not be reached or the response could not be read
    #[error("Origin transport error: {0}")]
    OriginTransport(String),

    /// Origin did not answer within the configured bound
    #[error("Origin timed out after {timeout_ms}ms for {url}")]
    OriginTimeout {
        /// URL that was fetched
        url: String,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// Index entry refers to a body file that does not exist
    #[error("Index of dataset '{dataset}' references missing fixture {hash} ({url})")]
    IndexCorrupted {
        /// Dataset whose index is corrupt
        dataset: String,
        /// Fingerprint hash of the dangling entry
        hash: String,
        /// URL recorded for the entry
        url: String,
    },

    /// Index file exists but is not a valid JSON object
    #[error("Invalid dataset index {path}: {reason}")]
    InvalidIndex {
        /// Path of the index file
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Advisory lock could not be obtained in time
    #[error("Timed out after {timeout_ms}ms waiting for lock on {path}")]
    LockTimeout {
        /// Locked file
        path: PathBuf,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// Dataset or host name that is not filesystem-safe
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Inbound request that cannot be turned into a call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Inbound request body exceeds the configured limit
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured limit
        limit: usize,
    },

    /// Method the origin collaborator does not handle
    #[error("Unsupported method for recording: {0}")]
    UnsupportedMethod(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl HulkError {
    /// Whether this error was caused by the real origin during RECORD
    #[must_use]
    pub fn is_origin_failure(&self) -> bool {
        matches!(
            self,
            Self::OriginStatus { .. } | Self::OriginTransport(_) | Self::OriginTimeout { .. }
        )
    }
}
