//! Per-run statistics.
//!
//! Counters are accumulated while a synchronizer runs and never influence
//! control flow. A [`SyncEngineStatsSession`] is opened per attempt and ended
//! into an immutable [`SyncEngineStats`] that is handed to a [`StatsRecorder`].

use parking_lot::Mutex;
use serde::Serialize;
use std::ops::AddAssign;
use std::time::Instant;

/// Counters for incoming records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDownloadStats {
    /// Records handed to the apply step.
    pub applied: usize,
    /// Records applied without error.
    pub succeeded: usize,
    /// Records that failed to decode or apply.
    pub failed: usize,
    /// Failures for records that had not failed before.
    pub new_failed: usize,
    /// Records that overwrote an unsynced local change.
    pub reconciled: usize,
}

impl SyncDownloadStats {
    /// Returns true if any counter is non-zero.
    pub fn has_data(&self) -> bool {
        self.applied > 0
            || self.succeeded > 0
            || self.failed > 0
            || self.new_failed > 0
            || self.reconciled > 0
    }
}

impl AddAssign for SyncDownloadStats {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.new_failed += other.new_failed;
        self.reconciled += other.reconciled;
    }
}

/// Counters for outgoing records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUploadStats {
    /// Records the server accepted.
    pub sent: usize,
    /// Records the server rejected.
    pub sent_failed: usize,
}

impl SyncUploadStats {
    /// Returns true if any counter is non-zero.
    pub fn has_data(&self) -> bool {
        self.sent > 0 || self.sent_failed > 0
    }
}

impl AddAssign for SyncUploadStats {
    fn add_assign(&mut self, other: Self) {
        self.sent += other.sent;
        self.sent_failed += other.sent_failed;
    }
}

/// Stats being collected for one engine run.
#[derive(Debug)]
pub struct SyncEngineStatsSession {
    collection: String,
    started: Instant,
    /// Incoming counters.
    pub download: SyncDownloadStats,
    /// Outgoing counters.
    pub upload: SyncUploadStats,
    failure_reason: Option<String>,
}

impl SyncEngineStatsSession {
    /// Opens a session for a collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            started: Instant::now(),
            download: SyncDownloadStats::default(),
            upload: SyncUploadStats::default(),
            failure_reason: None,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Records why the run failed.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
    }

    /// Ends the session.
    pub fn end(self) -> SyncEngineStats {
        SyncEngineStats {
            took_ms: self.started.elapsed().as_millis() as u64,
            collection: self.collection,
            download: self.download,
            upload: self.upload,
            failure_reason: self.failure_reason,
        }
    }
}

/// Final stats of one engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineStats {
    /// Collection name.
    pub collection: String,
    /// Wall time of the run in milliseconds.
    pub took_ms: u64,
    /// Incoming counters.
    pub download: SyncDownloadStats,
    /// Outgoing counters.
    pub upload: SyncUploadStats,
    /// Failure description, if the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SyncEngineStats {
    /// Returns true if the run moved any records.
    pub fn has_data(&self) -> bool {
        self.download.has_data() || self.upload.has_data()
    }
}

/// Receives ended stats.
pub trait StatsRecorder: Send + Sync {
    /// Records the stats of a finished run.
    fn record(&self, stats: SyncEngineStats);
}

/// A recorder that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStatsRecorder {
    recorded: Mutex<Vec<SyncEngineStats>>,
}

impl MemoryStatsRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub fn recorded(&self) -> Vec<SyncEngineStats> {
        self.recorded.lock().clone()
    }
}

impl StatsRecorder for MemoryStatsRecorder {
    fn record(&self, stats: SyncEngineStats) {
        self.recorded.lock().push(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn download_stats() -> impl Strategy<Value = SyncDownloadStats> {
        (0..1000usize, 0..1000usize, 0..1000usize, 0..1000usize, 0..1000usize).prop_map(
            |(applied, succeeded, failed, new_failed, reconciled)| SyncDownloadStats {
                applied,
                succeeded,
                failed,
                new_failed,
                reconciled,
            },
        )
    }

    fn sum(mut a: SyncDownloadStats, b: SyncDownloadStats) -> SyncDownloadStats {
        a += b;
        a
    }

    #[test]
    fn fresh_stats_have_no_data() {
        assert!(!SyncDownloadStats::default().has_data());
        assert!(!SyncUploadStats::default().has_data());

        let upload = SyncUploadStats {
            sent_failed: 1,
            ..SyncUploadStats::default()
        };
        assert!(upload.has_data());
    }

    #[test]
    fn session_end_keeps_counters() {
        let mut session = SyncEngineStatsSession::new("history");
        session.download.applied = 3;
        session.upload.sent = 2;
        session.record_failure("network");

        let stats = session.end();
        assert_eq!(stats.collection, "history");
        assert_eq!(stats.download.applied, 3);
        assert_eq!(stats.upload.sent, 2);
        assert_eq!(stats.failure_reason.as_deref(), Some("network"));
        assert!(stats.has_data());
    }

    #[test]
    fn memory_recorder_collects() {
        let recorder = MemoryStatsRecorder::new();
        recorder.record(SyncEngineStatsSession::new("passwords").end());
        assert_eq!(recorder.recorded().len(), 1);
    }

    proptest! {
        #[test]
        fn download_addition_is_commutative(a in download_stats(), b in download_stats()) {
            prop_assert_eq!(sum(a, b), sum(b, a));
        }

        #[test]
        fn download_addition_is_associative(
            a in download_stats(),
            b in download_stats(),
            c in download_stats(),
        ) {
            prop_assert_eq!(sum(sum(a, b), c), sum(a, sum(b, c)));
        }

        #[test]
        fn upload_addition_is_commutative(a in 0..1000usize, b in 0..1000usize, c in 0..1000usize) {
            let x = SyncUploadStats { sent: a, sent_failed: b };
            let y = SyncUploadStats { sent: c, sent_failed: a };
            let mut xy = x;
            xy += y;
            let mut yx = y;
            yx += x;
            prop_assert_eq!(xy, yx);
        }
    }
}
