//! Inspect command implementation.

use super::KNOWN_COLLECTIONS;
use colsync_engine::{
    failed_guids_key, last_fetched_key, sync_id_key, DownloaderState, FilePrefs, Prefs,
    SyncResult,
};
use colsync_protocol::Timestamp;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Prefs inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Prefs file path.
    pub path: String,
    /// Number of keys in the file.
    pub key_count: usize,
    /// Per-collection state.
    pub collections: Vec<CollectionState>,
}

/// Sync state of a single collection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionState {
    /// Collection name.
    pub collection: String,
    /// Remote engine sync id last seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,
    /// `lastFetched` timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetched: Option<Timestamp>,
    /// Downloader cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloader: Option<DownloaderState>,
    /// Number of records that failed to apply.
    pub failed_guids: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No prefs file found at {:?}", path).into());
    }
    let prefs = FilePrefs::open(path)?;
    let mut result = collect(&prefs)?;
    result.path = path.display().to_string();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers the state of every collection that has keys in `prefs`.
pub fn collect(prefs: &dyn Prefs) -> SyncResult<InspectResult> {
    let keys = prefs.keys_with_prefix("");
    let mut names: BTreeSet<String> = KNOWN_COLLECTIONS.iter().map(|c| c.to_string()).collect();
    names.extend(
        keys.iter()
            .filter_map(|k| k.split_once('.').map(|(c, _)| c.to_string())),
    );

    let mut collections = Vec::new();
    for name in names {
        let failed_guids = prefs
            .json(&failed_guids_key(&name))
            .and_then(|v| v.as_array().map(Vec::len))
            .unwrap_or(0);
        collections.push(CollectionState {
            sync_id: prefs.string(&sync_id_key(&name)),
            last_fetched: prefs.timestamp(&last_fetched_key(&name)),
            downloader: DownloaderState::load(prefs, &name)?,
            failed_guids,
            collection: name,
        });
    }

    Ok(InspectResult {
        path: String::new(),
        key_count: keys.len(),
        collections,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Prefs: {}", result.path);
    println!("Keys:  {}", result.key_count);

    for state in &result.collections {
        println!();
        println!("[{}]", state.collection);
        match &state.sync_id {
            Some(id) => println!("  sync id:       {id}"),
            None => println!("  sync id:       (never synced)"),
        }
        if let Some(ts) = state.last_fetched {
            println!("  last fetched:  {ts}");
        }
        if let Some(cursor) = &state.downloader {
            println!("  watermark:     {}", cursor.last_modified);
            if cursor.is_mid_batch() {
                println!(
                    "  mid-batch:     base {} offset {} ({} applied)",
                    cursor.base_timestamp,
                    cursor.next_offset.as_deref().unwrap_or("-"),
                    cursor.batch_guids.len()
                );
            }
        }
        println!("  failed GUIDs:  {}", state.failed_guids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colsync_engine::MemoryPrefs;
    use serde_json::json;

    #[test]
    fn empty_prefs_report_known_collections() {
        let result = collect(&MemoryPrefs::new()).unwrap();
        let names: Vec<_> = result.collections.iter().map(|c| c.collection.as_str()).collect();
        assert_eq!(names, ["history", "passwords"]);
        assert!(result.collections.iter().all(|c| c.last_fetched.is_none()));
    }

    #[test]
    fn reports_cursor_and_failures() {
        let prefs = MemoryPrefs::new();
        prefs.set_timestamp("passwords.lastFetched", 500).unwrap();
        prefs
            .set_json("passwords.failedGUIDs", json!(["a", "b"]))
            .unwrap();
        prefs
            .set_json(
                "history.downloader",
                json!({"lastModified": 10, "nextOffset": "2", "baseTimestamp": 10}),
            )
            .unwrap();
        prefs.set_timestamp("tabs.lastFetched", 7).unwrap();

        let result = collect(&prefs).unwrap();
        assert_eq!(result.key_count, 4);
        assert_eq!(result.collections.len(), 3);

        let history = &result.collections[0];
        let cursor = history.downloader.as_ref().unwrap();
        assert!(cursor.is_mid_batch());
        assert_eq!(cursor.last_modified, 10);

        let passwords = &result.collections[1];
        assert_eq!(passwords.last_fetched, Some(500));
        assert_eq!(passwords.failed_guids, 2);

        assert_eq!(result.collections[2].collection, "tabs");
    }
}
