//! Logins synchronizer.
//!
//! Logins are downloaded in a single request since `lastFetched` and applied
//! remote-wins. Local deletions and modifications are uploaded together.

use crate::client::{CollectionClient, RemoteState, StorageClient};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::observer::{SyncEvent, SyncObservers};
use crate::prefs::Prefs;
use crate::stats::{SyncDownloadStats, SyncEngineStatsSession, SyncUploadStats};
use crate::synchronizer::{
    reset_collection_state, ApplyOutcome, BatchOutcome, IndependentRecordSynchronizer, SyncStatus,
};
use colsync_protocol::{Guid, LoginPayload, MicrosecondTimestamp, Record, Timestamp};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the logins collection.
pub const LOGINS_COLLECTION: &str = "passwords";

const LOGIN_SORT_INDEX: i32 = 1;

/// A locally stored login. Times are microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Login {
    /// Stable identifier, shared with the remote record.
    pub guid: Guid,
    /// Origin the login belongs to.
    pub hostname: String,
    /// HTTP auth realm.
    pub http_realm: Option<String>,
    /// Form action origin.
    pub form_submit_url: Option<String>,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: String,
    /// Username form field name.
    pub username_field: Option<String>,
    /// Password form field name.
    pub password_field: Option<String>,
    /// Use count.
    pub times_used: u64,
    /// Creation time.
    pub time_created: MicrosecondTimestamp,
    /// Last use time.
    pub time_last_used: MicrosecondTimestamp,
    /// Last password change time.
    pub time_password_changed: MicrosecondTimestamp,
}

/// Encodes a login as an outgoing record.
pub fn encode_login(login: &Login) -> Record<LoginPayload> {
    let payload = LoginPayload {
        id: login.guid.clone(),
        hostname: login.hostname.clone(),
        http_realm: login.http_realm.clone(),
        form_submit_url: login.form_submit_url.clone(),
        username: login.username.clone(),
        password: login.password.clone(),
        username_field: login.username_field.clone(),
        password_field: login.password_field.clone(),
        times_used: login.times_used,
        time_created: login.time_created / 1000,
        time_last_used: login.time_last_used / 1000,
        time_password_changed: login.time_password_changed / 1000,
        deleted: false,
    };
    Record::new(payload, LOGIN_SORT_INDEX, None)
}

/// Encodes a login deletion as an outgoing record.
pub fn encode_deletion(guid: Guid) -> Record<LoginPayload> {
    Record::deletion(guid, None)
}

/// Decodes a non-deleted record into a login.
pub fn decode_login(record: &Record<LoginPayload>) -> Login {
    let payload = &record.payload;
    Login {
        guid: record.id.clone(),
        hostname: payload.hostname.clone(),
        http_realm: payload.http_realm.clone(),
        form_submit_url: payload.form_submit_url.clone(),
        username: payload.username.clone(),
        password: payload.password.clone(),
        username_field: payload.username_field.clone(),
        password_field: payload.password_field.clone(),
        times_used: payload.times_used,
        time_created: payload.time_created.saturating_mul(1000),
        time_last_used: payload.time_last_used.saturating_mul(1000),
        time_password_changed: payload.time_password_changed.saturating_mul(1000),
    }
}

/// Local login storage as seen by the synchronizer.
pub trait LoginsStorage: Send + Sync {
    /// Removes a login. Removing a missing login succeeds.
    fn delete_by_guid(&self, guid: &Guid, deleted_at: Timestamp) -> SyncResult<()>;

    /// Replaces local state with a remote login.
    ///
    /// Returns [`ApplyOutcome::Reconciled`] if an unsynced local change was
    /// overwritten.
    fn apply_changed_login(&self, login: &Login, modified: Timestamp) -> SyncResult<ApplyOutcome>;

    /// Returns logins deleted locally since the last upload.
    fn deleted_logins_to_upload(&self) -> SyncResult<Vec<Guid>>;

    /// Returns logins changed locally since the last upload.
    fn modified_logins_to_upload(&self) -> SyncResult<Vec<Login>>;

    /// Marks logins as uploaded at server time `modified`.
    fn mark_as_synchronized(&self, guids: &[Guid], modified: Timestamp) -> SyncResult<()>;

    /// Forgets uploaded deletions.
    fn mark_as_deleted(&self, guids: &[Guid]) -> SyncResult<()>;
}

fn apply_record(
    storage: &dyn LoginsStorage,
    record: &Record<LoginPayload>,
) -> SyncResult<ApplyOutcome> {
    if record.is_deleted() {
        storage.delete_by_guid(&record.id, record.modified)?;
        return Ok(ApplyOutcome::Applied);
    }
    storage.apply_changed_login(&decode_login(record), record.modified)
}

/// Synchronizes the logins collection.
pub struct LoginsSynchronizer {
    base: IndependentRecordSynchronizer,
    observers: Option<Arc<SyncObservers>>,
}

impl LoginsSynchronizer {
    /// Creates a synchronizer using `prefs` for its bookkeeping.
    pub fn new(config: &SyncConfig, prefs: Arc<dyn Prefs>) -> Self {
        Self {
            base: IndependentRecordSynchronizer::new(
                LOGINS_COLLECTION,
                config.logins.engine_version,
                config,
                prefs,
            ),
            observers: None,
        }
    }

    /// Notifies `observers` when remote changes are applied.
    pub fn with_observers(mut self, observers: Arc<SyncObservers>) -> Self {
        self.observers = Some(observers);
        self
    }

    /// Returns the `lastFetched` timestamp.
    pub fn last_fetched(&self) -> Timestamp {
        self.base.last_fetched()
    }

    /// Forgets all sync progress for logins.
    pub fn reset(&self) -> SyncResult<()> {
        reset_collection_state(self.base.prefs().as_ref(), LOGINS_COLLECTION)?;
        self.base.commit()
    }

    /// Runs one download-then-upload cycle.
    pub fn synchronize(
        &self,
        storage: &dyn LoginsStorage,
        client: &dyn StorageClient,
        remote: &RemoteState,
        session: &mut SyncEngineStatsSession,
    ) -> SyncResult<SyncStatus> {
        if let Some(reason) = self.base.reason_to_not_sync(client, remote) {
            info!(collection = LOGINS_COLLECTION, %reason, "not syncing");
            return Ok(SyncStatus::NotStarted(reason));
        }

        let result = self.run(storage, client, remote, session);
        if let Err(err) = &result {
            session.record_failure(err.to_string());
        }
        result
    }

    fn run(
        &self,
        storage: &dyn LoginsStorage,
        client: &dyn StorageClient,
        remote: &RemoteState,
        session: &mut SyncEngineStatsSession,
    ) -> SyncResult<SyncStatus> {
        let collection_client = self
            .base
            .require_collection_client::<LoginPayload>(client, remote)?;
        if self.base.ensure_sync_id(remote)? {
            info!(collection = LOGINS_COLLECTION, "sync id changed; starting over");
        }

        let applied = self.download(storage, &collection_client, remote, &mut session.download)?;
        if !applied {
            return Ok(SyncStatus::Partial {
                download: session.download,
                upload: session.upload,
            });
        }

        self.upload(storage, &collection_client, remote, &mut session.upload)?;
        info!(
            collection = LOGINS_COLLECTION,
            applied = session.download.applied,
            reconciled = session.download.reconciled,
            sent = session.upload.sent,
            "logins sync complete"
        );
        Ok(SyncStatus::Completed {
            download: session.download,
            upload: session.upload,
        })
    }

    /// Returns false if the batch was aborted.
    fn download(
        &self,
        storage: &dyn LoginsStorage,
        client: &CollectionClient<'_, LoginPayload>,
        remote: &RemoteState,
        stats: &mut SyncDownloadStats,
    ) -> SyncResult<bool> {
        let since = self.base.last_fetched();
        if !remote.info.has_changed_since(LOGINS_COLLECTION, since) {
            debug!(since, "no new logins");
            return Ok(true);
        }

        let page = client.get_since(since)?;
        self.base.note_rejected_records(&page.rejected, stats)?;

        let before = stats.succeeded;
        let outcome = self
            .base
            .apply_incoming_records(&page.records, stats, |record| apply_record(storage, record))?;
        if outcome == BatchOutcome::Aborted {
            return Ok(false);
        }

        let newest = page.records.iter().map(|r| r.modified).max();
        let fetched = page.last_modified.or(newest).unwrap_or(since).max(since);
        self.base.set_last_fetched(fetched)?;

        if stats.succeeded > before {
            if let Some(observers) = &self.observers {
                observers.notify(&SyncEvent::RemoteLoginChangesWereApplied);
            }
        }
        Ok(true)
    }

    fn upload(
        &self,
        storage: &dyn LoginsStorage,
        client: &CollectionClient<'_, LoginPayload>,
        remote: &RemoteState,
        stats: &mut SyncUploadStats,
    ) -> SyncResult<()> {
        let deleted = storage.deleted_logins_to_upload()?;
        let modified = storage.modified_logins_to_upload()?;
        if deleted.is_empty() && modified.is_empty() {
            return Ok(());
        }

        let last_fetched = self.base.last_fetched();
        let caught_up = remote
            .info
            .modified(LOGINS_COLLECTION)
            .map_or(true, |m| m <= last_fetched);

        let deleted_set: HashSet<Guid> = deleted.iter().cloned().collect();
        let records: Vec<_> = deleted
            .into_iter()
            .map(encode_deletion)
            .chain(modified.iter().map(encode_login))
            .collect();

        let timestamp =
            self.base
                .upload_records(client, &records, last_fetched, stats, |result, modified| {
                    let (gone, changed): (Vec<Guid>, Vec<Guid>) = result
                        .success
                        .iter()
                        .cloned()
                        .partition(|guid| deleted_set.contains(guid));
                    if !gone.is_empty() {
                        storage.mark_as_deleted(&gone)?;
                    }
                    if !changed.is_empty() {
                        storage.mark_as_synchronized(&changed, modified)?;
                    }
                    Ok(())
                })?;

        if caught_up {
            self.base.set_last_fetched(timestamp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockStorageClient;
    use crate::memory::MemoryLoginsStorage;
    use crate::observer::SyncObserver;
    use crate::prefs::MemoryPrefs;
    use colsync_protocol::{Bso, InfoCollections, MetaGlobal, DELETION_SORT_INDEX};
    use parking_lot::Mutex;

    fn login(guid: &str) -> Login {
        Login {
            guid: Guid::new(guid),
            hostname: "https://example.com".into(),
            form_submit_url: Some("https://example.com".into()),
            username: Some("alice".into()),
            password: "hunter2".into(),
            time_created: 1_500_000,
            time_last_used: 2_000_000,
            time_password_changed: 1_500_000,
            ..Login::default()
        }
    }

    fn remote_bso(login: &Login, modified: Timestamp) -> Bso {
        let mut bso = encode_login(login).to_bso().unwrap();
        bso.modified = modified;
        bso
    }

    fn remote_state(modified: Timestamp) -> RemoteState {
        RemoteState::new(
            InfoCollections::from_pairs([(LOGINS_COLLECTION, modified)]),
            MetaGlobal::new("sync").with_engine(LOGINS_COLLECTION, 1),
        )
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SyncEvent>>);

    impl SyncObserver for Recorder {
        fn on_sync_event(&self, event: &SyncEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn time_fields_convert_exactly() {
        let original = login("loginloginlo");
        let record = encode_login(&original);
        assert_eq!(record.payload.time_created, 1_500);
        assert_eq!(record.payload.time_last_used, 2_000);
        assert_eq!(record.sort_index, 1);
        assert_eq!(record.ttl, None);

        let bso = record.to_bso().unwrap();
        let decoded = decode_login(&Record::from_bso(&bso).unwrap());
        assert_eq!(decoded, original);
    }

    #[test]
    fn deletion_record_shape() {
        let record = encode_deletion(Guid::new("loginloginlo"));
        assert_eq!(record.sort_index, DELETION_SORT_INDEX);
        let json: serde_json::Value =
            serde_json::from_str(&record.to_bso().unwrap().payload).unwrap();
        assert_eq!(json, serde_json::json!({"id": "loginloginlo", "deleted": true}));
    }

    #[test]
    fn remote_wins_and_notifies() {
        let storage = MemoryLoginsStorage::new();
        let mut local = login("shared");
        local.password = "local".into();
        storage.add_local_login(local);

        let mut remote = login("shared");
        remote.password = "remote".into();
        let mock = MockStorageClient::new(50);
        mock.push_page(vec![remote_bso(&remote, 50)], 50, None);

        let observers = Arc::new(SyncObservers::new());
        let recorder: Arc<dyn SyncObserver> = Arc::new(Recorder::default());
        observers.register(&recorder);

        let sync = LoginsSynchronizer::new(&SyncConfig::default(), Arc::new(MemoryPrefs::new()))
            .with_observers(observers);
        let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
        let status = sync
            .synchronize(&storage, &mock, &remote_state(50), &mut session)
            .unwrap();

        assert!(status.is_completed());
        assert_eq!(session.download.reconciled, 1);
        assert_eq!(
            storage.login(&Guid::new("shared")).map(|l| l.password),
            Some("remote".to_string())
        );
        assert_eq!(sync.last_fetched(), 50);
        assert!(mock.recorded_posts().is_empty());
        assert_eq!(mock.recorded_gets()[0].params.newer, Some(0));
    }

    #[test]
    fn invalid_records_count_as_failed() {
        let storage = MemoryLoginsStorage::new();
        let mut invalid = login("invalid");
        invalid.password.clear();
        let mock = MockStorageClient::new(0);
        mock.push_page(
            vec![remote_bso(&invalid, 10), remote_bso(&login("valid"), 10)],
            10,
            None,
        );

        let sync = LoginsSynchronizer::new(&SyncConfig::default(), Arc::new(MemoryPrefs::new()));
        let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
        let status = sync
            .synchronize(&storage, &mock, &remote_state(10), &mut session)
            .unwrap();

        assert!(status.is_completed());
        assert_eq!(session.download.failed, 1);
        assert_eq!(session.download.succeeded, 1);
        assert!(storage.login(&Guid::new("valid")).is_some());
    }

    #[test]
    fn upload_attributes_successes_to_buckets() {
        let storage = MemoryLoginsStorage::new();
        storage.add_local_login(login("kept"));
        storage.add_local_login(login("gone"));
        storage.delete_local_login(&Guid::new("gone"));

        let mock = MockStorageClient::new(0);
        let sync = LoginsSynchronizer::new(&SyncConfig::default(), Arc::new(MemoryPrefs::new()));
        let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
        sync.synchronize(&storage, &mock, &remote_state(0), &mut session)
            .unwrap();

        let posts = mock.recorded_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].ids, vec![Guid::new("gone"), Guid::new("kept")]);
        assert!(storage.deleted_logins_to_upload().unwrap().is_empty());
        assert!(storage.modified_logins_to_upload().unwrap().is_empty());
        assert_eq!(session.upload.sent, 2);
        assert_eq!(sync.last_fetched(), 10);
    }

    #[test]
    fn idempotent_remote_deletion() {
        let storage = MemoryLoginsStorage::new();
        storage.add_local_login(login("gone"));
        let mut tombstone = encode_deletion(Guid::new("gone")).to_bso().unwrap();
        tombstone.modified = 10;
        let mock = MockStorageClient::new(0);
        mock.push_page(vec![tombstone.clone()], 10, None);
        mock.push_page(vec![tombstone], 10, None);

        let prefs: Arc<dyn Prefs> = Arc::new(MemoryPrefs::new());
        let sync = LoginsSynchronizer::new(&SyncConfig::default(), prefs.clone());
        let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
        sync.synchronize(&storage, &mock, &remote_state(10), &mut session)
            .unwrap();
        let after_once = storage.len();

        // Force a re-download of the same tombstone.
        sync.reset().unwrap();
        sync.synchronize(&storage, &mock, &remote_state(10), &mut session)
            .unwrap();

        assert_eq!(storage.len(), after_once);
        assert!(storage.login(&Guid::new("gone")).is_none());
        assert_eq!(session.download.failed, 0);
    }
}
