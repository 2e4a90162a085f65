//! Persistent key/value store for sync bookkeeping.
//!
//! Synchronizers keep their watermarks, downloader cursors and failed-record
//! sets here. Keys are namespaced by collection (`history.lastFetched`,
//! `passwords.downloader`, ...).

use crate::error::{SyncError, SyncResult};
use colsync_protocol::Timestamp;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Result of flushing a preference store to its backing medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Pending changes were written.
    Written,
    /// Nothing had changed since the last flush.
    Clean,
}

/// A key/value store holding JSON values.
///
/// Implementations use interior mutability so one store can be shared by
/// every synchronizer.
pub trait Prefs: Send + Sync {
    /// Returns the raw value of a key.
    fn json(&self, key: &str) -> Option<Value>;

    /// Stores a raw value.
    fn set_json(&self, key: &str, value: Value) -> SyncResult<()>;

    /// Removes a key. Missing keys are not an error.
    fn remove(&self, key: &str) -> SyncResult<()>;

    /// Lists keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Writes pending changes to the backing medium.
    fn flush(&self) -> SyncResult<FlushOutcome> {
        Ok(FlushOutcome::Clean)
    }

    /// Returns a timestamp value, or `None` if the key is absent or not a
    /// timestamp.
    fn timestamp(&self, key: &str) -> Option<Timestamp> {
        self.json(key).and_then(|v| v.as_u64())
    }

    /// Stores a timestamp value.
    fn set_timestamp(&self, key: &str, value: Timestamp) -> SyncResult<()> {
        self.set_json(key, Value::from(value))
    }

    /// Returns a string value.
    fn string(&self, key: &str) -> Option<String> {
        match self.json(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Stores a string value.
    fn set_string(&self, key: &str, value: &str) -> SyncResult<()> {
        self.set_json(key, Value::from(value))
    }
}

/// An in-memory preference store.
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemoryPrefs {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if the store has no keys.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Prefs for MemoryPrefs {
    fn json(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set_json(&self, key: &str, value: Value) -> SyncResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        keys_with_prefix(&self.values.read(), prefix)
    }
}

/// A preference store backed by a JSON file.
///
/// Changes are held in memory until [`flush`](Prefs::flush), which writes a
/// temporary file next to the target and renames it into place.
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    inner: RwLock<FileState>,
}

#[derive(Debug, Default)]
struct FileState {
    values: BTreeMap<String, Value>,
    dirty: bool,
}

impl FilePrefs {
    /// Opens a store, loading the file if it exists.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read(&path) {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                SyncError::Prefs(format!("cannot parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(SyncError::Io(e)),
        };

        Ok(Self {
            path,
            inner: RwLock::new(FileState {
                values,
                dirty: false,
            }),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if there are unwritten changes.
    pub fn is_dirty(&self) -> bool {
        self.inner.read().dirty
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Prefs for FilePrefs {
    fn json(&self, key: &str) -> Option<Value> {
        self.inner.read().values.get(key).cloned()
    }

    fn set_json(&self, key: &str, value: Value) -> SyncResult<()> {
        let mut inner = self.inner.write();
        if inner.values.get(key) != Some(&value) {
            inner.values.insert(key.to_string(), value);
            inner.dirty = true;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        let mut inner = self.inner.write();
        if inner.values.remove(key).is_some() {
            inner.dirty = true;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        keys_with_prefix(&self.inner.read().values, prefix)
    }

    fn flush(&self) -> SyncResult<FlushOutcome> {
        let mut inner = self.inner.write();
        if !inner.dirty {
            return Ok(FlushOutcome::Clean);
        }

        let data = serde_json::to_vec_pretty(&inner.values)
            .map_err(|e| SyncError::Prefs(format!("cannot serialize prefs: {e}")))?;

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &self.path)?;

        inner.dirty = false;
        Ok(FlushOutcome::Written)
    }
}

fn keys_with_prefix(values: &BTreeMap<String, Value>, prefix: &str) -> Vec<String> {
    values
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_typed_accessors() {
        let prefs = MemoryPrefs::new();
        assert_eq!(prefs.timestamp("history.lastFetched"), None);

        prefs.set_timestamp("history.lastFetched", 1_234).unwrap();
        prefs.set_string("history.syncId", "abc").unwrap();

        assert_eq!(prefs.timestamp("history.lastFetched"), Some(1_234));
        assert_eq!(prefs.string("history.syncId").as_deref(), Some("abc"));
        // Wrong type reads as absent.
        assert_eq!(prefs.timestamp("history.syncId"), None);
        assert_eq!(prefs.len(), 2);
    }

    #[test]
    fn prefix_listing() {
        let prefs = MemoryPrefs::new();
        prefs.set_timestamp("history.a", 1).unwrap();
        prefs.set_timestamp("history.b", 2).unwrap();
        prefs.set_timestamp("passwords.a", 3).unwrap();

        assert_eq!(
            prefs.keys_with_prefix("history."),
            vec!["history.a".to_string(), "history.b".to_string()]
        );

        prefs.remove("history.a").unwrap();
        prefs.remove("history.missing").unwrap();
        assert_eq!(prefs.keys_with_prefix("history.").len(), 1);
    }

    #[test]
    fn file_prefs_persist_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        {
            let prefs = FilePrefs::open(&path).unwrap();
            prefs.set_timestamp("passwords.lastFetched", 99).unwrap();
            assert!(prefs.is_dirty());
            assert_eq!(prefs.flush().unwrap(), FlushOutcome::Written);
            assert!(!prefs.is_dirty());
        }

        let prefs = FilePrefs::open(&path).unwrap();
        assert_eq!(prefs.timestamp("passwords.lastFetched"), Some(99));
        assert!(!dir.path().join("prefs.json.tmp").exists());
    }

    #[test]
    fn file_prefs_flush_reports_clean() {
        let dir = tempdir().unwrap();
        let prefs = FilePrefs::open(dir.path().join("prefs.json")).unwrap();
        assert_eq!(prefs.flush().unwrap(), FlushOutcome::Clean);

        prefs.set_timestamp("k", 1).unwrap();
        assert_eq!(prefs.flush().unwrap(), FlushOutcome::Written);

        // Rewriting the same value is not a change.
        prefs.set_timestamp("k", 1).unwrap();
        assert_eq!(prefs.flush().unwrap(), FlushOutcome::Clean);
    }

    #[test]
    fn file_prefs_reject_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, b"not json").unwrap();

        let result = FilePrefs::open(&path);
        assert!(matches!(result, Err(SyncError::Prefs(_))));
    }
}
