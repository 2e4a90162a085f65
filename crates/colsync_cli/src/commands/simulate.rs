//! Simulate command implementation.
//!
//! Seeds an in-process reference server with random records, adds a few
//! local changes, then runs the history and logins synchronizers once.

use colsync_engine::{
    encode_login, encode_place, FilePrefs, HistoryConfig, HistorySynchronizer,
    LoginsSynchronizer, MemoryHistoryStorage, MemoryLoginsStorage, MemoryPrefs,
    MemoryStatsRecorder, Prefs, RemoteState, StatsRecorder, SyncConfig, SyncEngineStats,
    SyncEngineStatsSession, SyncResult, SyncStatus, HISTORY_COLLECTION, LOGINS_COLLECTION,
};
use colsync_protocol::{Bso, Guid};
use colsync_server::{ServerConfig, SyncServer};
use colsync_testkit::{map_server_error, random_logins, random_places, LoopbackClient};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Remote history records to seed.
    pub history: usize,
    /// Remote logins to seed.
    pub logins: usize,
    /// History download page size.
    pub batch_size: usize,
}

/// Outcome of one engine in the simulation.
#[derive(Debug, Serialize)]
pub struct EngineReport {
    /// Short status.
    pub status: String,
    /// Counters gathered during the run.
    pub stats: SyncEngineStats,
}

/// Simulation result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateReport {
    /// Server clock after the run.
    pub server_time: u64,
    /// Records held by the server per collection after the run.
    pub server_records: Vec<(String, usize)>,
    /// Per-engine outcomes.
    pub engines: Vec<EngineReport>,
}

/// Runs the simulate command.
pub fn run(
    prefs_path: Option<&Path>,
    options: &SimulateOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let prefs: Arc<dyn Prefs> = match prefs_path {
        Some(path) => Arc::new(FilePrefs::open(path)?),
        None => Arc::new(MemoryPrefs::new()),
    };

    // Keep whatever progress was committed, even if the run failed.
    let result = simulate(Arc::clone(&prefs), options);
    prefs.flush()?;
    let report = result?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Seeds a fresh server and syncs both collections once.
pub fn simulate(prefs: Arc<dyn Prefs>, options: &SimulateOptions) -> SyncResult<SimulateReport> {
    // A fresh server per run; a new sync id makes stale cursors reset.
    let mut server_config = ServerConfig::default();
    server_config.sync_id = Guid::random().to_string();
    let server = Arc::new(SyncServer::new(server_config));
    let client = LoopbackClient::new(Arc::clone(&server));

    let places = random_places(options.history);
    let bsos = places
        .iter()
        .map(|(place, visits)| encode_place(place, visits).to_bso())
        .collect::<Result<Vec<Bso>, _>>()?;
    server
        .seed(HISTORY_COLLECTION, &bsos)
        .map_err(map_server_error)?;

    let logins = random_logins(options.logins);
    let bsos = logins
        .iter()
        .map(|login| encode_login(login).to_bso())
        .collect::<Result<Vec<Bso>, _>>()?;
    server
        .seed(LOGINS_COLLECTION, &bsos)
        .map_err(map_server_error)?;
    info!(
        history = options.history,
        logins = options.logins,
        "seeded remote collections"
    );

    let history_store = MemoryHistoryStorage::new();
    for (place, visits) in random_places(options.history / 10) {
        history_store.insert_local_place(place, visits);
    }
    let logins_store = MemoryLoginsStorage::new();
    for login in random_logins(options.logins / 10) {
        logins_store.add_local_login(login);
    }

    let config = SyncConfig::default().with_history(
        HistoryConfig::default().with_download_batch_size(options.batch_size.max(1)),
    );
    let recorder = MemoryStatsRecorder::new();
    let mut engines = Vec::new();

    let remote = RemoteState::fetch(&client)?;
    let mut history = HistorySynchronizer::new(&config, Arc::clone(&prefs));
    let mut session = SyncEngineStatsSession::new(HISTORY_COLLECTION);
    let status = history.synchronize(&history_store, &client, &remote, &|| true, &mut session)?;
    let stats = session.end();
    recorder.record(stats.clone());
    engines.push(EngineReport {
        status: describe(&status),
        stats,
    });

    let remote = RemoteState::fetch(&client)?;
    let logins_sync = LoginsSynchronizer::new(&config, Arc::clone(&prefs));
    let mut session = SyncEngineStatsSession::new(LOGINS_COLLECTION);
    let status = logins_sync.synchronize(&logins_store, &client, &remote, &mut session)?;
    let stats = session.end();
    recorder.record(stats.clone());
    engines.push(EngineReport {
        status: describe(&status),
        stats,
    });

    info!(
        runs = recorder.recorded().len(),
        requests = client.get_count() + client.post_count(),
        "simulation finished"
    );

    Ok(SimulateReport {
        server_time: server.store().now(),
        server_records: [HISTORY_COLLECTION, LOGINS_COLLECTION]
            .iter()
            .map(|c| (c.to_string(), server.store().len(c)))
            .collect(),
        engines,
    })
}

fn describe(status: &SyncStatus) -> String {
    match status {
        SyncStatus::Completed { .. } => "completed".into(),
        SyncStatus::Partial { .. } => "partial".into(),
        SyncStatus::NotStarted(reason) => format!("not started: {reason}"),
    }
}

fn print_text_output(report: &SimulateReport) {
    println!("Server time: {}", report.server_time);
    for (collection, count) in &report.server_records {
        println!("  {collection}: {count} record(s)");
    }
    for engine in &report.engines {
        let stats = &engine.stats;
        println!();
        println!("[{}] {} in {} ms", stats.collection, engine.status, stats.took_ms);
        println!(
            "  download: applied {} succeeded {} failed {} reconciled {}",
            stats.download.applied,
            stats.download.succeeded,
            stats.download.failed,
            stats.download.reconciled
        );
        println!(
            "  upload:   sent {} failed {}",
            stats.upload.sent, stats.upload.sent_failed
        );
        if let Some(reason) = &stats.failure_reason {
            println!("  failure:  {reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_downloads_and_uploads_everything() {
        let options = SimulateOptions {
            history: 250,
            logins: 20,
            batch_size: 100,
        };
        let report = simulate(Arc::new(MemoryPrefs::new()), &options).unwrap();

        assert_eq!(report.engines.len(), 2);
        assert!(report.engines.iter().all(|e| e.status == "completed"));

        let history = &report.engines[0].stats;
        assert_eq!(history.download.applied, 250);
        assert_eq!(history.upload.sent, 25);
        assert_eq!(report.server_records[0], ("history".to_string(), 275));

        let logins = &report.engines[1].stats;
        assert_eq!(logins.download.applied, 20);
        assert_eq!(logins.upload.sent, 2);
        assert_eq!(report.server_records[1], ("passwords".to_string(), 22));
    }
}
