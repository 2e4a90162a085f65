//! Test fixtures and sync harness.
//!
//! Provides a reference server, a loopback client, local in-memory stores
//! and helpers to seed remote collections.

use crate::loopback::LoopbackClient;
use colsync_engine::{
    encode_history_deletion, encode_login, encode_place, FilePrefs, HistorySynchronizer, Login,
    LoginsSynchronizer, MemoryHistoryStorage, MemoryLoginsStorage, MemoryPrefs, Place, Prefs,
    RemoteState, SyncConfig, SyncEngineStats, SyncEngineStatsSession, SyncStatus,
    HISTORY_COLLECTION, LOGINS_COLLECTION,
};
use colsync_protocol::{
    Bso, CleartextPayload, Guid, HistoryPayload, LoginPayload, Record, Timestamp, Visit,
    VisitType,
};
use colsync_server::{ServerConfig, SyncServer};
use std::sync::Arc;
use tempfile::TempDir;

/// Everything needed to run synchronizers against the reference server.
pub struct SyncHarness {
    /// The reference server.
    pub server: Arc<SyncServer>,
    /// Client connected to `server`.
    pub client: LoopbackClient,
    /// Bookkeeping store shared by the synchronizers this harness creates.
    pub prefs: Arc<MemoryPrefs>,
    /// Engine configuration.
    pub config: SyncConfig,
    /// Local history.
    pub history: MemoryHistoryStorage,
    /// Local logins.
    pub logins: MemoryLoginsStorage,
}

impl SyncHarness {
    /// Creates a harness with default server and engine configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default(), SyncConfig::default())
    }

    /// Creates a harness with explicit configuration.
    pub fn with_config(server_config: ServerConfig, config: SyncConfig) -> Self {
        let server = Arc::new(SyncServer::new(server_config));
        let client = LoopbackClient::new(Arc::clone(&server));
        Self {
            server,
            client,
            prefs: Arc::new(MemoryPrefs::new()),
            config,
            history: MemoryHistoryStorage::new(),
            logins: MemoryLoginsStorage::new(),
        }
    }

    /// Returns the prefs as a trait object.
    pub fn prefs(&self) -> Arc<dyn Prefs> {
        self.prefs.clone()
    }

    /// Fetches `info/collections` and `meta/global`.
    pub fn remote_state(&self) -> RemoteState {
        RemoteState::fetch(&self.client).expect("Failed to fetch remote state")
    }

    /// Creates a history synchronizer bound to this harness's prefs.
    pub fn history_synchronizer(&self) -> HistorySynchronizer {
        HistorySynchronizer::new(&self.config, self.prefs())
    }

    /// Creates a logins synchronizer bound to this harness's prefs.
    pub fn logins_synchronizer(&self) -> LoginsSynchronizer {
        LoginsSynchronizer::new(&self.config, self.prefs())
    }

    /// Runs one history sync with an always-on green light.
    pub fn sync_history(&self, sync: &mut HistorySynchronizer) -> (SyncStatus, SyncEngineStats) {
        self.sync_history_while(sync, &|| true)
    }

    /// Runs one history sync with the given green light.
    pub fn sync_history_while(
        &self,
        sync: &mut HistorySynchronizer,
        green_light: &dyn Fn() -> bool,
    ) -> (SyncStatus, SyncEngineStats) {
        let remote = self.remote_state();
        let mut session = SyncEngineStatsSession::new(HISTORY_COLLECTION);
        let status = sync
            .synchronize(&self.history, &self.client, &remote, green_light, &mut session)
            .expect("History sync failed");
        (status, session.end())
    }

    /// Runs one logins sync.
    pub fn sync_logins(&self, sync: &LoginsSynchronizer) -> (SyncStatus, SyncEngineStats) {
        let remote = self.remote_state();
        let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
        let status = sync
            .synchronize(&self.logins, &self.client, &remote, &mut session)
            .expect("Logins sync failed");
        (status, session.end())
    }

    /// Writes places to the remote history collection.
    pub fn seed_history(&self, places: &[(Place, Vec<Visit>)]) -> Timestamp {
        let bsos: Vec<Bso> = places
            .iter()
            .map(|(place, visits)| to_bso(&encode_place(place, visits)))
            .collect();
        self.seed(HISTORY_COLLECTION, &bsos)
    }

    /// Writes history tombstones to the remote collection.
    pub fn seed_history_deletions(&self, guids: &[Guid]) -> Timestamp {
        let bsos: Vec<Bso> = guids
            .iter()
            .map(|guid| to_bso(&encode_history_deletion(guid.clone())))
            .collect();
        self.seed(HISTORY_COLLECTION, &bsos)
    }

    /// Writes logins to the remote passwords collection.
    pub fn seed_logins(&self, logins: &[Login]) -> Timestamp {
        let bsos: Vec<Bso> = logins.iter().map(|l| to_bso(&encode_login(l))).collect();
        self.seed(LOGINS_COLLECTION, &bsos)
    }

    /// Writes raw records to any collection.
    pub fn seed(&self, collection: &str, bsos: &[Bso]) -> Timestamp {
        self.server
            .seed(collection, bsos)
            .expect("Failed to seed collection")
    }

    /// Reads a history record back from the server.
    pub fn remote_history(&self, guid: &Guid) -> Option<Record<HistoryPayload>> {
        self.remote_record(HISTORY_COLLECTION, guid)
    }

    /// Reads a login record back from the server.
    pub fn remote_login(&self, guid: &Guid) -> Option<Record<LoginPayload>> {
        self.remote_record(LOGINS_COLLECTION, guid)
    }

    fn remote_record<T: CleartextPayload>(&self, collection: &str, guid: &Guid) -> Option<Record<T>> {
        self.server
            .store()
            .record(collection, guid)
            .map(|bso| Record::from_bso(&bso).expect("Server holds an undecodable record"))
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn to_bso<T: CleartextPayload>(record: &Record<T>) -> Bso {
    record.to_bso().expect("Failed to encode record")
}

/// File-backed prefs in a temporary directory.
pub struct TestPrefs {
    /// The prefs store.
    pub prefs: Arc<FilePrefs>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestPrefs {
    /// Opens an empty prefs file in a new temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let prefs = FilePrefs::open(temp_dir.path().join("prefs.json"))
            .expect("Failed to open prefs");
        Self {
            prefs: Arc::new(prefs),
            _temp_dir: temp_dir,
        }
    }

    /// Reopens the same file, as a restarted process would.
    pub fn reopen(&self) -> Arc<FilePrefs> {
        Arc::new(FilePrefs::open(self.prefs.path()).expect("Failed to reopen prefs"))
    }
}

impl Default for TestPrefs {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a syncable place with `visit_count` visits.
pub fn sample_place(index: usize, visit_count: usize) -> (Place, Vec<Visit>) {
    let place = Place::new(
        Guid::new(format!("place{index:07}")),
        format!("https://example.com/page/{index}"),
        format!("Page {index}"),
    );
    let base = 1_600_000_000_000_000 + (index as u64) * 1_000_000;
    let visits = (0..visit_count)
        .map(|v| Visit::new(base + v as u64, VisitType::Link))
        .collect();
    (place, visits)
}

/// Builds `count` distinct places with one visit each.
pub fn sample_places(count: usize) -> Vec<(Place, Vec<Visit>)> {
    (0..count).map(|i| sample_place(i, 1)).collect()
}

/// Builds a login. Times are whole milliseconds expressed in microseconds.
pub fn sample_login(index: usize) -> Login {
    let created = 1_600_000_000_000_000 + (index as u64) * 1_000;
    Login {
        guid: Guid::new(format!("login{index:07}")),
        hostname: format!("https://site{index}.example.com"),
        form_submit_url: Some(format!("https://site{index}.example.com/login")),
        username: Some(format!("user{index}")),
        password: format!("hunter{index}"),
        username_field: Some("user".into()),
        password_field: Some("pass".into()),
        times_used: 1,
        time_created: created,
        time_last_used: created,
        time_password_changed: created,
        ..Login::default()
    }
}

/// Builds `count` distinct logins.
pub fn sample_logins(count: usize) -> Vec<Login> {
    (0..count).map(sample_login).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_reaches_the_server() {
        let harness = SyncHarness::new();
        let modified = harness.seed_history(&sample_places(3));
        assert_eq!(harness.server.store().len(HISTORY_COLLECTION), 3);
        assert_eq!(harness.remote_state().info.modified(HISTORY_COLLECTION), Some(modified));

        let record = harness.remote_history(&Guid::new("place0000001")).unwrap();
        assert_eq!(record.payload.hist_uri, "https://example.com/page/1");
    }

    #[test]
    fn sample_logins_are_valid() {
        for login in sample_logins(5) {
            assert!(encode_login(&login).payload.is_valid());
        }
    }

    #[test]
    fn test_prefs_survive_reopen() {
        let prefs = TestPrefs::new();
        prefs.prefs.set_timestamp("history.lastFetched", 42).unwrap();
        prefs.prefs.flush().unwrap();
        assert_eq!(prefs.reopen().timestamp("history.lastFetched"), Some(42));
    }
}
