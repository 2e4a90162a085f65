//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while converting records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload text is not valid JSON for the expected payload type.
    #[error("malformed payload for record {id}: {source}")]
    Json {
        /// Record ID.
        id: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The payload parsed but is missing required fields.
    #[error("invalid payload for record {id}")]
    InvalidPayload {
        /// Record ID.
        id: String,
    },

    /// The envelope ID and the payload ID disagree.
    #[error("record id mismatch: envelope {envelope}, payload {payload}")]
    IdMismatch {
        /// ID carried by the envelope.
        envelope: String,
        /// ID carried inside the payload.
        payload: String,
    },

    /// The payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Returns the record ID this error refers to, if any.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            ProtocolError::Json { id, .. } | ProtocolError::InvalidPayload { id } => Some(id),
            ProtocolError::IdMismatch { envelope, .. } => Some(envelope),
            ProtocolError::Serialize(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_is_reported() {
        let err = ProtocolError::InvalidPayload { id: "abc".into() };
        assert_eq!(err.record_id(), Some("abc"));
        assert!(err.to_string().contains("abc"));
    }
}
