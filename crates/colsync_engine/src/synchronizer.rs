//! Shared scaffolding for record synchronizers.
//!
//! [`IndependentRecordSynchronizer`] owns the per-collection bookkeeping
//! (`lastFetched`, the failed-record set), decides whether a run may start,
//! and applies incoming batches under a failure mask.

use crate::client::{CollectionClient, RemoteState, StorageClient};
use crate::config::SyncConfig;
use crate::downloader::DownloaderState;
use crate::error::{SyncError, SyncResult};
use crate::prefs::Prefs;
use crate::stats::{SyncDownloadStats, SyncUploadStats};
use crate::uploader;
use colsync_protocol::{CleartextPayload, Guid, PostResult, Record, Timestamp};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a synchronizer declined to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotStartedReason {
    /// The server asked us to back off.
    Backoff {
        /// Seconds left before requests are allowed again.
        remaining_seconds: u64,
    },
    /// No usable credentials.
    NotAuthenticated,
    /// The server holds data in an older storage format; it must be upgraded
    /// to `needs` first.
    StorageFormatOutdated {
        /// Storage version this client requires.
        needs: u32,
    },
    /// The server holds data in a newer storage format than we understand.
    StorageFormatTooNew {
        /// Storage version this client understands.
        expected: u32,
    },
    /// The engine is not enabled (or was declined) in `meta/global`.
    EngineRemotelyNotEnabled,
    /// The remote engine data is in an older record format.
    EngineFormatOutdated {
        /// Engine version this client writes.
        needs: u32,
    },
}

impl fmt::Display for SyncNotStartedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backoff { remaining_seconds } => {
                write!(f, "backing off for {remaining_seconds}s")
            }
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::StorageFormatOutdated { needs } => {
                write!(f, "server storage format outdated, need version {needs}")
            }
            Self::StorageFormatTooNew { expected } => {
                write!(f, "server storage format too new, expected version {expected}")
            }
            Self::EngineRemotelyNotEnabled => write!(f, "engine not enabled on server"),
            Self::EngineFormatOutdated { needs } => {
                write!(f, "engine format outdated, need version {needs}")
            }
        }
    }
}

/// Outcome of a synchronizer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Download and upload both finished.
    Completed {
        /// Incoming counters of this run.
        download: SyncDownloadStats,
        /// Outgoing counters of this run.
        upload: SyncUploadStats,
    },
    /// The run stopped early; committed progress is kept.
    Partial {
        /// Incoming counters of this run.
        download: SyncDownloadStats,
        /// Outgoing counters of this run.
        upload: SyncUploadStats,
    },
    /// The run did not start; no state was touched.
    NotStarted(SyncNotStartedReason),
}

impl SyncStatus {
    /// Returns true for [`SyncStatus::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncStatus::Completed { .. })
    }
}

/// What applying a single incoming record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The record was written locally.
    Applied,
    /// The record overwrote an unsynced local change.
    Reconciled,
    /// The record was deliberately not applied.
    Ignored,
}

/// Whether a batch was applied in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every record was attempted.
    Applied,
    /// Too many failures; later records were not attempted.
    Aborted,
}

/// Prefs key of a collection's `lastFetched` timestamp.
pub fn last_fetched_key(collection: &str) -> String {
    format!("{collection}.lastFetched")
}

/// Prefs key of a collection's failed-record set.
pub fn failed_guids_key(collection: &str) -> String {
    format!("{collection}.failedGUIDs")
}

/// Prefs key of the remote engine sync id last seen for a collection.
pub fn sync_id_key(collection: &str) -> String {
    format!("{collection}.syncID")
}

/// Removes every piece of sync bookkeeping kept for a collection.
pub fn reset_collection_state(prefs: &dyn Prefs, collection: &str) -> SyncResult<()> {
    prefs.remove(&sync_id_key(collection))?;
    prefs.remove(&last_fetched_key(collection))?;
    prefs.remove(&failed_guids_key(collection))?;
    prefs.remove(&DownloaderState::key(collection))
}

/// Base synchronizer for collections whose records are independent of each
/// other.
pub struct IndependentRecordSynchronizer {
    collection: String,
    engine_version: u32,
    storage_version: u32,
    max_failures: usize,
    max_records_per_post: usize,
    prefs: Arc<dyn Prefs>,
}

impl IndependentRecordSynchronizer {
    /// Creates a synchronizer for `collection`.
    pub fn new(
        collection: impl Into<String>,
        engine_version: u32,
        config: &SyncConfig,
        prefs: Arc<dyn Prefs>,
    ) -> Self {
        Self {
            collection: collection.into(),
            engine_version,
            storage_version: config.storage_version,
            max_failures: config.max_failures,
            max_records_per_post: config.max_records_per_post,
            prefs,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the shared preference store.
    pub fn prefs(&self) -> &Arc<dyn Prefs> {
        &self.prefs
    }

    /// Returns the maximum number of records per POST.
    pub fn max_records_per_post(&self) -> usize {
        self.max_records_per_post
    }

    /// Returns the persisted `lastFetched` timestamp, zero if unset.
    pub fn last_fetched(&self) -> Timestamp {
        self.prefs
            .timestamp(&last_fetched_key(&self.collection))
            .unwrap_or(0)
    }

    /// Persists the `lastFetched` timestamp.
    pub fn set_last_fetched(&self, timestamp: Timestamp) -> SyncResult<()> {
        self.prefs
            .set_timestamp(&last_fetched_key(&self.collection), timestamp)?;
        self.commit()
    }

    /// Flushes pending bookkeeping writes.
    pub fn commit(&self) -> SyncResult<()> {
        self.prefs.flush()?;
        Ok(())
    }

    /// Returns the IDs of records that failed to apply in earlier runs.
    pub fn failed_guids(&self) -> SyncResult<BTreeSet<Guid>> {
        match self.prefs.json(&failed_guids_key(&self.collection)) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeSet::new()),
        }
    }

    fn set_failed_guids(&self, guids: &BTreeSet<Guid>) -> SyncResult<()> {
        let key = failed_guids_key(&self.collection);
        if guids.is_empty() {
            self.prefs.remove(&key)?;
        } else {
            self.prefs.set_json(&key, serde_json::to_value(guids)?)?;
        }
        self.commit()
    }

    /// Records the remote engine sync id.
    ///
    /// Returns true if a different id was recorded before, in which case all
    /// bookkeeping for the collection has been cleared.
    pub fn ensure_sync_id(&self, remote: &RemoteState) -> SyncResult<bool> {
        let Some(engine) = remote.meta.engine(&self.collection) else {
            return Ok(false);
        };
        let key = sync_id_key(&self.collection);
        let previous = self.prefs.string(&key);
        if previous.as_deref() == Some(engine.sync_id.as_str()) {
            return Ok(false);
        }

        let changed = previous.is_some();
        if changed {
            reset_collection_state(self.prefs.as_ref(), &self.collection)?;
        }
        self.prefs.set_string(&key, &engine.sync_id)?;
        self.commit()?;
        Ok(changed)
    }

    /// Returns why this run should not start, if it should not.
    pub fn reason_to_not_sync(
        &self,
        client: &dyn StorageClient,
        remote: &RemoteState,
    ) -> Option<SyncNotStartedReason> {
        if let Some(remaining_seconds) = client.backoff_remaining().filter(|s| *s > 0) {
            return Some(SyncNotStartedReason::Backoff { remaining_seconds });
        }
        if !client.is_authenticated() {
            return Some(SyncNotStartedReason::NotAuthenticated);
        }

        let remote_storage = remote.meta.storage_version;
        if remote_storage < self.storage_version {
            return Some(SyncNotStartedReason::StorageFormatOutdated {
                needs: self.storage_version,
            });
        }
        if remote_storage > self.storage_version {
            return Some(SyncNotStartedReason::StorageFormatTooNew {
                expected: self.storage_version,
            });
        }

        if !remote.meta.is_engine_enabled(&self.collection) {
            return Some(SyncNotStartedReason::EngineRemotelyNotEnabled);
        }
        match remote.meta.engine(&self.collection) {
            Some(engine) if engine.version < self.engine_version => {
                Some(SyncNotStartedReason::EngineFormatOutdated {
                    needs: self.engine_version,
                })
            }
            _ => None,
        }
    }

    /// Returns a typed client, or `None` if the remote engine version is
    /// newer than ours.
    pub fn collection_client<'a, T: CleartextPayload>(
        &self,
        client: &'a dyn StorageClient,
        remote: &RemoteState,
    ) -> Option<CollectionClient<'a, T>> {
        let remote_version = remote
            .meta
            .engine(&self.collection)
            .map_or(self.engine_version, |e| e.version);
        if remote_version > self.engine_version {
            return None;
        }
        Some(CollectionClient::new(client, self.collection.clone()))
    }

    /// Like [`collection_client`](Self::collection_client), failing with
    /// [`SyncError::IncompatibleEngine`].
    pub fn require_collection_client<'a, T: CleartextPayload>(
        &self,
        client: &'a dyn StorageClient,
        remote: &RemoteState,
    ) -> SyncResult<CollectionClient<'a, T>> {
        self.collection_client(client, remote).ok_or_else(|| {
            SyncError::IncompatibleEngine {
                collection: self.collection.clone(),
                local: self.engine_version,
                remote: remote
                    .meta
                    .engine(&self.collection)
                    .map_or(0, |e| e.version),
            }
        })
    }

    /// Applies records one at a time.
    ///
    /// Up to `max_failures` failing records are logged and skipped. The next
    /// failure aborts the batch and the remaining records are not attempted.
    pub fn apply_incoming_records<T, F>(
        &self,
        records: &[Record<T>],
        stats: &mut SyncDownloadStats,
        mut apply: F,
    ) -> SyncResult<BatchOutcome>
    where
        F: FnMut(&Record<T>) -> SyncResult<ApplyOutcome>,
    {
        if records.is_empty() {
            return Ok(BatchOutcome::Applied);
        }

        let mut failed_set = self.failed_guids()?;
        let mut batch = SyncDownloadStats::default();
        let mut outcome = BatchOutcome::Applied;

        for record in records {
            match apply(record) {
                Ok(result) => {
                    if result == ApplyOutcome::Reconciled {
                        batch.reconciled += 1;
                    }
                    failed_set.remove(&record.id);
                }
                Err(err) => {
                    batch.failed += 1;
                    if failed_set.insert(record.id.clone()) {
                        batch.new_failed += 1;
                    }
                    if batch.failed > self.max_failures {
                        warn!(
                            collection = %self.collection,
                            id = %record.id,
                            error = %err,
                            failures = batch.failed,
                            "too many failures; aborting batch"
                        );
                        outcome = BatchOutcome::Aborted;
                        break;
                    }
                    warn!(collection = %self.collection, id = %record.id, error = %err, "failed to apply record");
                }
            }
        }

        batch.applied = records.len();
        batch.succeeded = records.len() - batch.failed;
        *stats += batch;

        self.set_failed_guids(&failed_set)?;
        debug!(
            collection = %self.collection,
            applied = batch.applied,
            failed = batch.failed,
            ?outcome,
            "applied incoming batch"
        );
        Ok(outcome)
    }

    /// Counts records that could not be decoded as failed.
    pub fn note_rejected_records(
        &self,
        rejected: &[Guid],
        stats: &mut SyncDownloadStats,
    ) -> SyncResult<()> {
        if rejected.is_empty() {
            return Ok(());
        }
        let mut failed_set = self.failed_guids()?;
        for id in rejected {
            stats.failed += 1;
            if failed_set.insert(id.clone()) {
                stats.new_failed += 1;
            }
        }
        self.set_failed_guids(&failed_set)
    }

    /// Uploads records in POST-sized chunks.
    pub fn upload_records<T, F>(
        &self,
        client: &CollectionClient<'_, T>,
        records: &[Record<T>],
        last_timestamp: Timestamp,
        stats: &mut SyncUploadStats,
        on_upload: F,
    ) -> SyncResult<Timestamp>
    where
        T: CleartextPayload,
        F: FnMut(&PostResult, Timestamp) -> SyncResult<()>,
    {
        uploader::upload_records(
            client,
            records,
            last_timestamp,
            self.max_records_per_post,
            stats,
            on_upload,
        )
    }
}
