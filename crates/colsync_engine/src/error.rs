//! Error types for the sync engine.

use colsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The collection changed on the server since the given precondition.
    #[error("precondition failed for collection {collection}")]
    PreconditionFailed {
        /// Collection name.
        collection: String,
    },

    /// The server rejected our credentials.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Record encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The preference store could not be read or written.
    #[error("prefs error: {0}")]
    Prefs(String),

    /// The remote engine uses a record format we cannot read.
    #[error("incompatible engine {collection}: local version {local}, remote version {remote}")]
    IncompatibleEngine {
        /// Collection name.
        collection: String,
        /// Engine version this client writes.
        local: u32,
        /// Engine version found on the server.
        remote: u32,
    },

    /// Too many records in one batch failed to apply.
    #[error("aborted applying {collection} batch after {failures} failures")]
    BatchAborted {
        /// Collection name.
        collection: String,
        /// Number of failures seen before aborting.
        failures: usize,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error outside of record payloads.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a storage error from anything printable.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::PreconditionFailed { .. } => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}
