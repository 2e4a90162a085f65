//! Versioned records and their wire envelope.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Guid, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort index given to deletion records so they sort ahead of everything else.
pub const DELETION_SORT_INDEX: i32 = 5_000_000;

/// A cleartext payload carried inside a [`Record`].
///
/// Implementors are semi-structured documents with an ID and a `deleted`
/// flag. A deleted payload carries nothing but its ID.
pub trait CleartextPayload: Serialize + DeserializeOwned + Clone + fmt::Debug {
    /// Returns the record ID stored in the payload.
    fn id(&self) -> &Guid;

    /// Returns true if the payload is a deletion marker.
    fn is_deleted(&self) -> bool;

    /// Returns true if all fields required for this payload kind are present.
    fn is_valid(&self) -> bool;

    /// Builds a deletion marker for the given ID.
    fn tombstone(id: Guid) -> Self;
}

/// A versioned record in a remote collection.
///
/// `modified` is assigned by the server. It is ignored on upload and
/// populated on download.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    /// Record ID, unique within the collection.
    pub id: Guid,
    /// Decoded payload.
    pub payload: T,
    /// Server modification time in milliseconds.
    pub modified: Timestamp,
    /// Server-side sort hint.
    pub sort_index: i32,
    /// Time to live in seconds, if the record should expire.
    pub ttl: Option<u32>,
}

impl<T: CleartextPayload> Record<T> {
    /// Creates an outgoing record for a payload.
    pub fn new(payload: T, sort_index: i32, ttl: Option<u32>) -> Self {
        Self {
            id: payload.id().clone(),
            payload,
            modified: 0,
            sort_index,
            ttl,
        }
    }

    /// Creates an outgoing deletion record.
    pub fn deletion(id: Guid, ttl: Option<u32>) -> Self {
        Self {
            payload: T::tombstone(id.clone()),
            id,
            modified: 0,
            sort_index: DELETION_SORT_INDEX,
            ttl,
        }
    }

    /// Returns true if this record marks a deletion.
    pub fn is_deleted(&self) -> bool {
        self.payload.is_deleted()
    }

    /// Encodes the record into its wire envelope.
    ///
    /// Deletions are written as `{"id": …, "deleted": true}` and nothing else.
    pub fn to_bso(&self) -> ProtocolResult<Bso> {
        let payload = if self.payload.is_deleted() {
            serde_json::to_string(&Tombstone {
                id: &self.id,
                deleted: true,
            })
        } else {
            serde_json::to_string(&self.payload)
        }
        .map_err(ProtocolError::Serialize)?;

        Ok(Bso {
            id: self.id.clone(),
            modified: self.modified,
            sortindex: Some(self.sort_index),
            ttl: self.ttl,
            payload,
        })
    }

    /// Decodes a record from its wire envelope.
    ///
    /// Fails with [`ProtocolError::Json`] when the payload is not parseable
    /// and with [`ProtocolError::InvalidPayload`] when required fields are
    /// missing.
    pub fn from_bso(bso: &Bso) -> ProtocolResult<Self> {
        let payload: T = serde_json::from_str(&bso.payload).map_err(|source| ProtocolError::Json {
            id: bso.id.to_string(),
            source,
        })?;

        if payload.id() != &bso.id {
            return Err(ProtocolError::IdMismatch {
                envelope: bso.id.to_string(),
                payload: payload.id().to_string(),
            });
        }

        if !payload.is_valid() {
            return Err(ProtocolError::InvalidPayload {
                id: bso.id.to_string(),
            });
        }

        Ok(Self {
            id: bso.id.clone(),
            payload,
            modified: bso.modified,
            sort_index: bso.sortindex.unwrap_or(0),
            ttl: bso.ttl,
        })
    }
}

#[derive(Serialize)]
struct Tombstone<'a> {
    id: &'a Guid,
    deleted: bool,
}

/// Basic storage object: the wire envelope of a record.
///
/// The payload is kept as JSON text so the server never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bso {
    /// Record ID.
    pub id: Guid,
    /// Server modification time in milliseconds; zero on upload.
    #[serde(default)]
    pub modified: Timestamp,
    /// Sort hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i32>,
    /// Time to live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// JSON text of the cleartext payload.
    pub payload: String,
}

impl Bso {
    /// Returns the payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
