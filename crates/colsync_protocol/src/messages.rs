//! Request and response types for collection access.

use crate::record::Bso;
use crate::types::{Guid, Timestamp};
use serde::{Deserialize, Serialize};

/// Sort order for collection reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest modification first.
    #[default]
    Oldest,
    /// Newest modification first.
    Newest,
    /// Highest sort index first.
    Index,
}

/// Query parameters for a collection GET.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetParams {
    /// Only return records modified strictly after this time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newer: Option<Timestamp>,
    /// Result ordering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
    /// Maximum number of records to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Continuation token from a previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    /// Fail with 412 if the collection changed after this time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_unmodified_since: Option<Timestamp>,
}

impl GetParams {
    /// Creates parameters returning everything newer than `since`.
    pub fn since(since: Timestamp) -> Self {
        Self {
            newer: Some(since),
            ..Self::default()
        }
    }

    /// Sets the sort order.
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the continuation token.
    pub fn with_offset(mut self, offset: Option<String>) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the unmodified-since precondition.
    pub fn with_if_unmodified_since(mut self, timestamp: Option<Timestamp>) -> Self {
        self.if_unmodified_since = timestamp;
        self
    }
}

/// Metadata returned alongside every server response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Last-modified time of the addressed resource (X-Last-Modified).
    pub last_modified: Option<Timestamp>,
    /// Continuation token when more records remain (X-Weave-Next-Offset).
    pub next_offset: Option<String>,
    /// Server-requested backoff in seconds (X-Weave-Backoff).
    pub backoff_seconds: Option<u64>,
}

/// A server response: a value plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<T> {
    /// Decoded body.
    pub value: T,
    /// Header metadata.
    pub metadata: ResponseMetadata,
}

impl<T> Response<T> {
    /// Creates a response.
    pub fn new(value: T, metadata: ResponseMetadata) -> Self {
        Self { value, metadata }
    }

    /// Maps the body, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            value: f(self.value),
            metadata: self.metadata,
        }
    }
}

/// One page of raw records from a collection GET.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPage {
    /// Records in the requested order.
    pub records: Vec<Bso>,
}

impl CollectionPage {
    /// Creates a page.
    pub fn new(records: Vec<Bso>) -> Self {
        Self { records }
    }
}

/// Outcome of a collection POST, per record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResult {
    /// Server modification time assigned to the accepted records.
    pub modified: Timestamp,
    /// IDs the server stored.
    pub success: Vec<Guid>,
    /// IDs the server rejected.
    pub failed: Vec<Guid>,
}

impl PostResult {
    /// Returns true if every record was accepted.
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}
