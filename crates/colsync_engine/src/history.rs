//! History synchronizer.
//!
//! Downloads history in batches through a [`BatchingDownloader`], applying
//! each page before committing it, then uploads locally deleted and modified
//! places.

use crate::client::{CollectionClient, RemoteState, StorageClient};
use crate::config::{HistoryConfig, SyncConfig};
use crate::downloader::{BatchingDownloader, DownloadEndState};
use crate::error::SyncResult;
use crate::prefs::Prefs;
use crate::stats::{SyncDownloadStats, SyncEngineStatsSession, SyncUploadStats};
use crate::synchronizer::{
    reset_collection_state, ApplyOutcome, BatchOutcome, IndependentRecordSynchronizer, SyncStatus,
};
use colsync_protocol::{Guid, HistoryPayload, Record, Timestamp, Visit};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the history collection.
pub const HISTORY_COLLECTION: &str = "history";

/// Time to live of history records: 60 days, in seconds.
pub const HISTORY_TTL: u32 = 60 * 24 * 60 * 60;

/// Sort index of non-deleted history records.
const HISTORY_SORT_INDEX: i32 = 1;

/// A local history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    /// Stable identifier, shared with the remote record.
    pub guid: Guid,
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
}

impl Place {
    /// Creates a place.
    pub fn new(guid: Guid, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            guid,
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Local history storage as seen by the synchronizer.
pub trait HistoryStorage: Send + Sync {
    /// Removes a place and its visits. Removing a missing place succeeds.
    fn delete_by_guid(&self, guid: &Guid, deleted_at: Timestamp) -> SyncResult<()>;

    /// Creates a place or updates its URL and title.
    fn insert_or_update_place(&self, place: &Place, modified: Timestamp) -> SyncResult<()>;

    /// Adds visits to a place. Visits already present are ignored.
    fn store_remote_visits(&self, visits: &[Visit], guid: &Guid) -> SyncResult<()>;

    /// Returns places deleted locally since the last upload.
    fn deleted_history_to_upload(&self) -> SyncResult<Vec<Guid>>;

    /// Returns places changed locally since the last upload, with their visits.
    fn modified_history_to_upload(&self) -> SyncResult<Vec<(Place, Vec<Visit>)>>;

    /// Marks places as uploaded at server time `modified`.
    fn mark_as_synchronized(&self, guids: &[Guid], modified: Timestamp) -> SyncResult<()>;

    /// Forgets uploaded deletions.
    fn mark_as_deleted(&self, guids: &[Guid]) -> SyncResult<()>;

    /// Called once a download has been applied in full.
    fn done_applying_records_after_download(&self) -> SyncResult<()>;

    /// Called after an upload that sent at least one record.
    fn done_updating_metadata_after_upload(&self) -> SyncResult<()>;
}

/// Encodes a place and its visits as an outgoing record.
pub fn encode_place(place: &Place, visits: &[Visit]) -> Record<HistoryPayload> {
    let payload = HistoryPayload {
        id: place.guid.clone(),
        hist_uri: place.url.clone(),
        title: place.title.clone(),
        visits: visits.to_vec(),
        deleted: false,
    };
    Record::new(payload, HISTORY_SORT_INDEX, Some(HISTORY_TTL))
}

/// Encodes a place deletion as an outgoing record.
pub fn encode_deletion(guid: Guid) -> Record<HistoryPayload> {
    Record::deletion(guid, Some(HISTORY_TTL))
}

/// Decodes a non-deleted record into a place and its visits.
pub fn decode_place(record: &Record<HistoryPayload>) -> (Place, Vec<Visit>) {
    let place = Place::new(
        record.id.clone(),
        record.payload.hist_uri.clone(),
        record.payload.title.clone(),
    );
    (place, record.payload.visits.clone())
}

fn apply_record(
    storage: &dyn HistoryStorage,
    config: &HistoryConfig,
    record: &Record<HistoryPayload>,
) -> SyncResult<ApplyOutcome> {
    if record.is_deleted() {
        storage.delete_by_guid(&record.id, record.modified)?;
        return Ok(ApplyOutcome::Applied);
    }

    if config.is_ignored_url(&record.payload.hist_uri) {
        debug!(id = %record.id, "ignoring history record with unsynced URL");
        return Ok(ApplyOutcome::Ignored);
    }

    let (place, visits) = decode_place(record);
    storage.insert_or_update_place(&place, record.modified)?;
    storage.store_remote_visits(&visits, &record.id)?;
    Ok(ApplyOutcome::Applied)
}

/// Synchronizes the history collection.
pub struct HistorySynchronizer {
    base: IndependentRecordSynchronizer,
    config: HistoryConfig,
    downloader: BatchingDownloader<HistoryPayload>,
}

impl HistorySynchronizer {
    /// Creates a synchronizer using `prefs` for its bookkeeping.
    pub fn new(config: &SyncConfig, prefs: Arc<dyn Prefs>) -> Self {
        let base = IndependentRecordSynchronizer::new(
            HISTORY_COLLECTION,
            config.history.engine_version,
            config,
            prefs.clone(),
        );
        Self {
            base,
            config: config.history.clone(),
            downloader: BatchingDownloader::new(HISTORY_COLLECTION, prefs),
        }
    }

    /// Returns the download watermark.
    pub fn last_modified(&self) -> Timestamp {
        self.downloader.last_modified()
    }

    /// Forgets all sync progress for history.
    pub fn reset(&mut self) -> SyncResult<()> {
        self.downloader.reset()?;
        reset_collection_state(self.base.prefs().as_ref(), HISTORY_COLLECTION)?;
        self.base.commit()
    }

    /// Runs one download-then-upload cycle.
    ///
    /// `green_light` is polled before every page; once it returns false the
    /// run stops with [`SyncStatus::Partial`] and nothing is uploaded.
    pub fn synchronize(
        &mut self,
        storage: &dyn HistoryStorage,
        client: &dyn StorageClient,
        remote: &RemoteState,
        green_light: &dyn Fn() -> bool,
        session: &mut SyncEngineStatsSession,
    ) -> SyncResult<SyncStatus> {
        if let Some(reason) = self.base.reason_to_not_sync(client, remote) {
            info!(collection = HISTORY_COLLECTION, %reason, "not syncing");
            return Ok(SyncStatus::NotStarted(reason));
        }

        let result = self.run(storage, client, remote, green_light, session);
        if let Err(err) = &result {
            session.record_failure(err.to_string());
        }
        result
    }

    fn run(
        &mut self,
        storage: &dyn HistoryStorage,
        client: &dyn StorageClient,
        remote: &RemoteState,
        green_light: &dyn Fn() -> bool,
        session: &mut SyncEngineStatsSession,
    ) -> SyncResult<SyncStatus> {
        let collection_client = self
            .base
            .require_collection_client::<HistoryPayload>(client, remote)?;

        if self.base.ensure_sync_id(remote)? {
            info!(collection = HISTORY_COLLECTION, "sync id changed; starting over");
            self.downloader.reset()?;
        }
        self.migrate_last_fetched()?;

        let downloaded = self.download(
            storage,
            &collection_client,
            remote,
            green_light,
            &mut session.download,
        )?;
        if !downloaded {
            info!(
                collection = HISTORY_COLLECTION,
                applied = session.download.applied,
                failed = session.download.failed,
                "history sync stopped early"
            );
            return Ok(SyncStatus::Partial {
                download: session.download,
                upload: session.upload,
            });
        }

        self.upload(storage, &collection_client, remote, &mut session.upload)?;
        info!(
            collection = HISTORY_COLLECTION,
            applied = session.download.applied,
            sent = session.upload.sent,
            "history sync complete"
        );
        Ok(SyncStatus::Completed {
            download: session.download,
            upload: session.upload,
        })
    }

    /// Moves a legacy `lastFetched` value into the downloader, once.
    fn migrate_last_fetched(&mut self) -> SyncResult<()> {
        let last_fetched = self.base.last_fetched();
        if last_fetched == 0 {
            return Ok(());
        }
        if last_fetched > self.downloader.last_modified() {
            debug!(last_fetched, "migrating lastFetched into downloader");
            self.downloader.advance_timestamp_to(last_fetched)?;
        }
        // A batch in progress keeps the old watermark; retry on a later run.
        if self.downloader.last_modified() < last_fetched {
            return Ok(());
        }
        self.base.set_last_fetched(0)
    }

    /// Returns false if the download stopped before completing.
    fn download(
        &mut self,
        storage: &dyn HistoryStorage,
        client: &CollectionClient<'_, HistoryPayload>,
        remote: &RemoteState,
        green_light: &dyn Fn() -> bool,
        stats: &mut SyncDownloadStats,
    ) -> SyncResult<bool> {
        let batch_size = self.config.download_batch_size;
        loop {
            let end = self
                .downloader
                .go(client, &remote.info, batch_size, green_light)?;

            match end {
                DownloadEndState::Interrupted => return Ok(false),
                DownloadEndState::NoNewData => {
                    self.downloader.advance()?;
                    return Ok(true);
                }
                DownloadEndState::Incomplete | DownloadEndState::Complete => {
                    self.base
                        .note_rejected_records(self.downloader.rejected(), stats)?;

                    let config = &self.config;
                    let outcome = self.base.apply_incoming_records(
                        self.downloader.retrieve(),
                        stats,
                        |record| apply_record(storage, config, record),
                    )?;
                    if outcome == BatchOutcome::Aborted {
                        return Ok(false);
                    }

                    self.downloader.advance()?;
                    if end == DownloadEndState::Complete {
                        storage.done_applying_records_after_download()?;
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn upload(
        &mut self,
        storage: &dyn HistoryStorage,
        client: &CollectionClient<'_, HistoryPayload>,
        remote: &RemoteState,
        stats: &mut SyncUploadStats,
    ) -> SyncResult<()> {
        let watermark = self.downloader.last_modified();
        let caught_up = remote
            .info
            .modified(HISTORY_COLLECTION)
            .map_or(true, |m| m <= watermark);
        let mut timestamp = watermark;
        let mut uploaded = false;

        let deleted = storage.deleted_history_to_upload()?;
        if !deleted.is_empty() {
            let records: Vec<_> = deleted.into_iter().map(encode_deletion).collect();
            timestamp = self
                .base
                .upload_records(client, &records, timestamp, stats, |result, _| {
                    storage.mark_as_deleted(&result.success)
                })?;
            uploaded = true;
        }

        let modified = storage.modified_history_to_upload()?;
        for chunk in modified.chunks(self.config.upload_chunk_size) {
            let records: Vec<_> = chunk
                .iter()
                .map(|(place, visits)| encode_place(place, visits))
                .collect();
            timestamp = self
                .base
                .upload_records(client, &records, timestamp, stats, |result, modified| {
                    storage.mark_as_synchronized(&result.success, modified)
                })?;
            uploaded = true;
        }

        if uploaded {
            storage.done_updating_metadata_after_upload()?;
            if caught_up {
                self.downloader.advance_timestamp_to(timestamp)?;
            }
        }
        Ok(())
    }
}
