//! Error types for the reference server.

use colsync_protocol::Timestamp;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the reference server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The collection changed after the client's precondition (412).
    #[error("precondition failed: {collection} modified at {modified}, after {since}")]
    PreconditionFailed {
        /// Collection name.
        collection: String,
        /// Current last-modified time of the collection.
        modified: Timestamp,
        /// Precondition the client sent.
        since: Timestamp,
    },

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The requested document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::PreconditionFailed { .. }
                | ServerError::NotAuthorized(_)
                | ServerError::NotFound(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}
