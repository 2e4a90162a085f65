//! # colsync Server
//!
//! In-memory reference collection server for colsync.
//!
//! This crate provides:
//! - `info/collections` and `meta/global` documents
//! - Paged collection reads (`newer`, `sort`, `limit`, `offset`)
//! - Conditional writes guarded by `X-If-Unmodified-Since`
//! - Backoff injection
//!
//! # Architecture
//!
//! The server keeps a logical clock that advances on every write. Records
//! written in one request share a modification time, and a collection's
//! last-modified time is the time of its latest write.
//!
//! It is used by the integration tests and the CLI simulation; there is no
//! network listener.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
pub use store::{CollectionStore, StorePage};
