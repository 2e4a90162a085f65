//! Logins sync against the reference server.

use colsync_engine::{
    SyncEngineStatsSession, SyncEvent, SyncNotStartedReason, SyncObserver, SyncObservers,
    SyncStatus, LOGINS_COLLECTION,
};
use colsync_protocol::{Bso, Guid};
use colsync_testkit::{init_test_tracing, sample_login, sample_logins, SyncHarness};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct CountingObserver {
    applied: AtomicUsize,
}

impl SyncObserver for CountingObserver {
    fn on_sync_event(&self, event: &SyncEvent) {
        if *event == SyncEvent::RemoteLoginChangesWereApplied {
            self.applied.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn harness() -> SyncHarness {
    init_test_tracing();
    SyncHarness::new()
}

#[test]
fn download_then_upload() {
    let harness = harness();
    harness.seed_logins(&sample_logins(5));
    let local = sample_login(100);
    harness.logins.add_local_login(local.clone());

    let logins = harness.logins_synchronizer();
    let (status, stats) = harness.sync_logins(&logins);

    assert!(status.is_completed());
    assert_eq!(stats.download.applied, 5);
    assert_eq!(stats.upload.sent, 1);
    assert_eq!(harness.logins.len(), 6);
    assert_eq!(
        harness.logins.login(&Guid::new("login0000003")),
        Some(sample_login(3))
    );

    let remote = harness.remote_login(&local.guid).unwrap();
    assert_eq!(remote.payload.password, local.password);
    assert_eq!(remote.payload.time_created * 1000, local.time_created);

    // Caught up with our own upload; the next run makes no requests.
    assert_eq!(
        logins.last_fetched(),
        harness.server.store().modified(LOGINS_COLLECTION)
    );
    let (status, stats) = harness.sync_logins(&logins);
    assert!(status.is_completed());
    assert!(!stats.has_data());
    assert_eq!(harness.client.get_count(), 1);
}

#[test]
fn only_changes_since_last_fetch_are_downloaded() {
    let harness = harness();
    harness.seed_logins(&sample_logins(3));
    let logins = harness.logins_synchronizer();
    harness.sync_logins(&logins);

    harness.seed_logins(&[sample_login(10)]);
    let (_, stats) = harness.sync_logins(&logins);

    assert_eq!(stats.download.applied, 1);
    assert_eq!(harness.logins.len(), 4);
}

#[test]
fn local_deletion_uploads_tombstone() {
    let harness = harness();
    harness.seed_logins(&sample_logins(2));
    let logins = harness.logins_synchronizer();
    harness.sync_logins(&logins);

    let gone = Guid::new("login0000000");
    harness.logins.delete_local_login(&gone);
    let (status, stats) = harness.sync_logins(&logins);

    assert!(status.is_completed());
    assert_eq!(stats.upload.sent, 1);
    assert!(harness.remote_login(&gone).unwrap().is_deleted());
    assert_eq!(harness.logins.len(), 1);

    // Nothing left to upload.
    let (_, stats) = harness.sync_logins(&logins);
    assert_eq!(stats.upload.sent, 0);
}

#[test]
fn remote_change_wins_and_notifies() {
    let harness = harness();
    harness.seed_logins(&[sample_login(1)]);

    let observers = Arc::new(SyncObservers::new());
    let counter = Arc::new(CountingObserver::default());
    let observer: Arc<dyn SyncObserver> = counter.clone();
    observers.register(&observer);

    let logins = harness.logins_synchronizer().with_observers(Arc::clone(&observers));
    harness.sync_logins(&logins);
    assert_eq!(counter.applied.load(Ordering::SeqCst), 1);

    let mut local = sample_login(1);
    local.password = "changed-here".into();
    harness.logins.add_local_login(local);

    let mut remote = sample_login(1);
    remote.password = "changed-there".into();
    harness.seed_logins(&[remote]);

    let (status, stats) = harness.sync_logins(&logins);
    assert!(status.is_completed());
    assert_eq!(stats.download.reconciled, 1);
    assert_eq!(stats.upload.sent, 0);
    assert_eq!(
        harness.logins.login(&Guid::new("login0000001")).unwrap().password,
        "changed-there"
    );
    assert_eq!(counter.applied.load(Ordering::SeqCst), 2);
}

#[test]
fn invalid_remote_records_count_as_failed() {
    let harness = harness();
    harness.seed_logins(&sample_logins(2));
    // No password and no origin: decodes but fails validation.
    harness.seed(
        LOGINS_COLLECTION,
        &[Bso {
            id: Guid::new("brokenlogin0"),
            modified: 0,
            sortindex: None,
            ttl: None,
            payload: r#"{"id":"brokenlogin0","hostname":"https://x.example.com"}"#.into(),
        }],
    );

    let logins = harness.logins_synchronizer();
    let (status, stats) = harness.sync_logins(&logins);

    assert!(status.is_completed());
    assert_eq!(stats.download.applied, 2);
    assert_eq!(stats.download.failed, 1);
    assert_eq!(stats.download.new_failed, 1);
    assert_eq!(harness.logins.len(), 2);
}

#[test]
fn unauthenticated_client_does_not_sync() {
    let harness = harness();
    harness.seed_logins(&sample_logins(2));
    let remote = harness.remote_state();
    harness.client.set_authenticated(false);

    let logins = harness.logins_synchronizer();
    let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
    let status = logins
        .synchronize(&harness.logins, &harness.client, &remote, &mut session)
        .unwrap();

    assert_eq!(
        status,
        SyncStatus::NotStarted(SyncNotStartedReason::NotAuthenticated)
    );
    assert!(harness.logins.is_empty());
    assert_eq!(logins.last_fetched(), 0);
}

#[test]
fn transport_failure_keeps_last_fetched() {
    let harness = harness();
    harness.seed_logins(&sample_logins(2));
    let remote = harness.remote_state();
    harness.client.fail_next_requests(1);

    let logins = harness.logins_synchronizer();
    let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
    let err = logins
        .synchronize(&harness.logins, &harness.client, &remote, &mut session)
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(logins.last_fetched(), 0);
    assert!(session.end().failure_reason.is_some());

    let (status, _) = harness.sync_logins(&logins);
    assert!(status.is_completed());
    assert_eq!(harness.logins.len(), 2);
}

#[test]
fn reset_downloads_everything_again() {
    let harness = harness();
    harness.seed_logins(&sample_logins(4));
    let logins = harness.logins_synchronizer();
    harness.sync_logins(&logins);

    logins.reset().unwrap();
    assert_eq!(logins.last_fetched(), 0);

    let (_, stats) = harness.sync_logins(&logins);
    assert_eq!(stats.download.applied, 4);
}
