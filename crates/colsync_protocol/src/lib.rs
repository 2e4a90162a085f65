//! # colsync Protocol
//!
//! Record envelopes, payloads and protocol messages for colsync.
//!
//! This crate provides:
//! - `Guid` and timestamp types
//! - `Record<T>` and its wire envelope `Bso`
//! - Cleartext payloads for history and logins
//! - `InfoCollections` and `MetaGlobal` server metadata
//! - GET/POST message types for collection access
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod history;
mod logins;
mod messages;
mod meta;
mod record;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use history::{HistoryPayload, Visit, VisitType};
pub use logins::LoginPayload;
pub use messages::{
    CollectionPage, GetParams, PostResult, Response, ResponseMetadata, SortOrder,
};
pub use meta::{EngineMeta, InfoCollections, MetaGlobal, STORAGE_VERSION};
pub use record::{Bso, CleartextPayload, Record, DELETION_SORT_INDEX};
pub use types::{now_millis, Guid, MicrosecondTimestamp, Timestamp};
