//! # colsync Engine
//!
//! Client-side synchronizers for colsync collections.
//!
//! This crate provides:
//! - A storage client abstraction and typed collection access
//! - A resumable batching downloader
//! - A chunked upload batcher that threads server timestamps
//! - Shared synchronizer scaffolding with failure masking
//! - History and logins synchronizers
//! - Stats accumulation, a preference store and sync observers
//!
//! ## Architecture
//!
//! Every run is **download-then-upload**:
//! 1. Check whether the run may start at all (backoff, auth, versions)
//! 2. Download remote changes and apply them to local storage
//! 3. Upload local changes, preconditioned on the server time we last saw
//!
//! ## Key Invariants
//!
//! - Watermarks only advance past records that were applied
//! - Deleted records carry nothing but their ID
//! - Uploads are sequential; each chunk's precondition is the previous
//!   chunk's server time
//! - A run that does not start touches no state

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

mod client;
mod config;
mod downloader;
mod error;
mod history;
mod logins;
mod memory;
mod observer;
mod prefs;
mod stats;
mod synchronizer;
mod uploader;

pub use client::{
    CollectionClient, MockStorageClient, RecordPage, RecordedGet, RecordedPost, RemoteState,
    StorageClient,
};
pub use config::{HistoryConfig, LoginsConfig, SyncConfig};
pub use downloader::{BatchingDownloader, DownloadEndState, DownloaderState};
pub use error::{SyncError, SyncResult};
pub use history::{
    decode_place, encode_deletion as encode_history_deletion, encode_place, HistoryStorage,
    HistorySynchronizer, Place, HISTORY_COLLECTION, HISTORY_TTL,
};
pub use logins::{
    decode_login, encode_deletion as encode_login_deletion, encode_login, Login, LoginsStorage,
    LoginsSynchronizer, LOGINS_COLLECTION,
};
pub use memory::{MemoryHistoryStorage, MemoryLoginsStorage};
pub use observer::{SyncEvent, SyncObserver, SyncObservers};
pub use prefs::{FilePrefs, FlushOutcome, MemoryPrefs, Prefs};
pub use stats::{
    MemoryStatsRecorder, StatsRecorder, SyncDownloadStats, SyncEngineStats,
    SyncEngineStatsSession, SyncUploadStats,
};
pub use synchronizer::{
    failed_guids_key, last_fetched_key, reset_collection_state, sync_id_key, ApplyOutcome,
    BatchOutcome, IndependentRecordSynchronizer, SyncNotStartedReason, SyncStatus,
};
pub use uploader::upload_records;
