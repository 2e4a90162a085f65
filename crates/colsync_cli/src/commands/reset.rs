//! Reset command implementation.

use colsync_engine::{reset_collection_state, FilePrefs, FlushOutcome, Prefs};
use std::path::Path;

/// Runs the reset command.
pub fn run(path: &Path, collection: &str) -> Result<(), Box<dyn std::error::Error>> {
    if collection.is_empty() || collection.contains('.') {
        return Err(format!("Invalid collection name {:?}", collection).into());
    }

    let prefs = FilePrefs::open(path)?;
    let before = prefs.keys_with_prefix(&format!("{collection}.")).len();
    reset_collection_state(&prefs, collection)?;

    match prefs.flush()? {
        FlushOutcome::Written => {
            println!("Reset {collection}: removed {before} key(s)");
        }
        FlushOutcome::Clean => {
            println!("Nothing to reset for {collection}");
        }
    }
    Ok(())
}
