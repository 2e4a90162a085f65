//! Resumable, page-by-page download of a collection.
//!
//! The downloader walks everything newer than its watermark in server order
//! (oldest first), one page per [`go`](BatchingDownloader::go). A batch that
//! spans several pages is pinned with `X-If-Unmodified-Since`; if the
//! collection changes underneath, the batch restarts from the watermark and
//! records that were already applied at the same modification time are
//! skipped.
//!
//! The cursor only moves in [`advance`](BatchingDownloader::advance), so a
//! page that was fetched but not applied is fetched again next time.

use crate::client::{CollectionClient, RecordPage};
use crate::error::{SyncError, SyncResult};
use crate::prefs::Prefs;
use colsync_protocol::{
    CleartextPayload, GetParams, Guid, InfoCollections, Record, SortOrder, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a call to [`BatchingDownloader::go`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEndState {
    /// The last page of the batch was fetched.
    Complete,
    /// A page was fetched and more remain.
    Incomplete,
    /// The green light was off; nothing was fetched.
    Interrupted,
    /// The server has nothing newer than the watermark.
    NoNewData,
}

/// Persisted downloader cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloaderState {
    /// Watermark: server time of the last completed batch.
    pub last_modified: Timestamp,
    /// `newer` value of the batch in progress.
    pub base_timestamp: Timestamp,
    /// Continuation token of the batch in progress.
    pub next_offset: Option<String>,
    /// Server time the batch in progress is pinned to.
    pub batch_modified: Option<Timestamp>,
    /// Records applied in the batch in progress, with their modified time.
    pub batch_guids: BTreeMap<Guid, Timestamp>,
}

impl DownloaderState {
    /// Returns the prefs key holding the cursor of a collection.
    pub fn key(collection: &str) -> String {
        format!("{collection}.downloader")
    }

    /// Loads a persisted cursor, if any.
    pub fn load(prefs: &dyn Prefs, collection: &str) -> SyncResult<Option<Self>> {
        match prefs.json(&Self::key(collection)) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Returns true if a batch is partially downloaded.
    pub fn is_mid_batch(&self) -> bool {
        self.next_offset.is_some() || !self.batch_guids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staged {
    Continue,
    Complete,
    Restart,
}

/// Downloads one collection in batches.
pub struct BatchingDownloader<T> {
    collection: String,
    prefs: Arc<dyn Prefs>,
    state: DownloaderState,
    staged: Option<(Staged, RecordPage<T>)>,
}

impl<T: CleartextPayload> BatchingDownloader<T> {
    /// Creates a downloader, restoring its cursor from `prefs`.
    ///
    /// An unreadable cursor is discarded and the download starts over.
    pub fn new(collection: impl Into<String>, prefs: Arc<dyn Prefs>) -> Self {
        let collection = collection.into();
        let state = match DownloaderState::load(prefs.as_ref(), &collection) {
            Ok(state) => state.unwrap_or_default(),
            Err(err) => {
                warn!(collection = %collection, error = %err, "discarding unreadable downloader state");
                DownloaderState::default()
            }
        };

        Self {
            collection,
            prefs,
            state,
            staged: None,
        }
    }

    /// Returns the watermark.
    pub fn last_modified(&self) -> Timestamp {
        self.state.last_modified
    }

    /// Returns the current cursor.
    pub fn state(&self) -> &DownloaderState {
        &self.state
    }

    /// Fetches the next page.
    ///
    /// `green_light` is checked before any request is made.
    pub fn go(
        &mut self,
        client: &CollectionClient<'_, T>,
        info: &InfoCollections,
        limit: usize,
        green_light: &dyn Fn() -> bool,
    ) -> SyncResult<DownloadEndState> {
        self.staged = None;

        if !green_light() {
            debug!(collection = %self.collection, "green light off; interrupting download");
            return Ok(DownloadEndState::Interrupted);
        }

        let continuing = self.state.next_offset.is_some();
        match info.modified(&self.collection) {
            None => return Ok(DownloadEndState::NoNewData),
            Some(modified) if !continuing && modified <= self.state.last_modified => {
                return Ok(DownloadEndState::NoNewData)
            }
            Some(_) => {}
        }

        let params = GetParams::since(self.state.base_timestamp)
            .with_sort(SortOrder::Oldest)
            .with_limit(limit)
            .with_offset(self.state.next_offset.clone())
            .with_if_unmodified_since(if continuing {
                self.state.batch_modified
            } else {
                None
            });

        let mut page = match client.get(&params) {
            Ok(page) => page,
            Err(SyncError::PreconditionFailed { .. }) if continuing => {
                info!(collection = %self.collection, "collection changed mid-batch; restarting batch");
                self.staged = Some((Staged::Restart, RecordPage::default()));
                return Ok(DownloadEndState::Incomplete);
            }
            Err(err) => return Err(err),
        };

        let fetched = page.records.len();
        let applied = &self.state.batch_guids;
        page.records
            .retain(|r| applied.get(&r.id) != Some(&r.modified));
        debug!(
            collection = %self.collection,
            fetched,
            skipped = fetched - page.records.len(),
            rejected = page.rejected.len(),
            "fetched page"
        );

        let end = if page.next_offset.is_some() {
            self.staged = Some((Staged::Continue, page));
            DownloadEndState::Incomplete
        } else {
            self.staged = Some((Staged::Complete, page));
            DownloadEndState::Complete
        };
        Ok(end)
    }

    /// Returns the records of the staged page.
    pub fn retrieve(&self) -> &[Record<T>] {
        match &self.staged {
            Some((_, page)) => &page.records,
            None => &[],
        }
    }

    /// Returns IDs of staged records that failed to decode.
    pub fn rejected(&self) -> &[Guid] {
        match &self.staged {
            Some((_, page)) => &page.rejected,
            None => &[],
        }
    }

    /// Commits the staged page and persists the cursor.
    ///
    /// Does nothing if no page is staged.
    pub fn advance(&mut self) -> SyncResult<()> {
        let Some((staged, page)) = self.staged.take() else {
            return Ok(());
        };

        match staged {
            Staged::Restart => {
                self.state.next_offset = None;
                self.state.batch_modified = None;
            }
            Staged::Continue => {
                if self.state.next_offset.is_none() {
                    self.state.batch_modified = page.last_modified;
                }
                self.state.next_offset = page.next_offset;
                for record in page.records {
                    self.state.batch_guids.insert(record.id, record.modified);
                }
            }
            Staged::Complete => {
                let newest = page.records.iter().map(|r| r.modified).max();
                let watermark = page
                    .last_modified
                    .or(self.state.batch_modified)
                    .or(newest)
                    .unwrap_or(self.state.last_modified)
                    .max(self.state.last_modified);

                self.state.last_modified = watermark;
                self.state.base_timestamp = watermark;
                self.state.next_offset = None;
                self.state.batch_modified = None;
                self.state.batch_guids.clear();
                debug!(collection = %self.collection, watermark, "download batch complete");
            }
        }

        self.persist()
    }

    /// Moves the watermark forward to `timestamp` when no batch is in
    /// progress. Earlier timestamps are ignored.
    pub fn advance_timestamp_to(&mut self, timestamp: Timestamp) -> SyncResult<()> {
        if timestamp <= self.state.last_modified || self.state.is_mid_batch() {
            return Ok(());
        }
        self.state.last_modified = timestamp;
        self.state.base_timestamp = timestamp;
        self.persist()
    }

    /// Forgets all download progress.
    pub fn reset(&mut self) -> SyncResult<()> {
        self.state = DownloaderState::default();
        self.staged = None;
        self.prefs.remove(&DownloaderState::key(&self.collection))?;
        self.prefs.flush()?;
        Ok(())
    }

    /// Writes the cursor and flushes it to durable storage.
    fn persist(&self) -> SyncResult<()> {
        let value = serde_json::to_value(&self.state)?;
        self.prefs
            .set_json(&DownloaderState::key(&self.collection), value)?;
        self.prefs.flush()?;
        Ok(())
    }
}
