//! Server metadata documents.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Global storage format version understood by this client.
pub const STORAGE_VERSION: u32 = 5;

/// Last-modified time of every collection on the server.
///
/// Clients compare these against their own watermarks to skip collections
/// with nothing new, without issuing a request per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfoCollections {
    collections: BTreeMap<String, Timestamp>,
}

impl InfoCollections {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from `(collection, modified)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Timestamp)>,
        S: Into<String>,
    {
        Self {
            collections: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Returns the last-modified time of a collection, if it exists.
    pub fn modified(&self, collection: &str) -> Option<Timestamp> {
        self.collections.get(collection).copied()
    }

    /// Sets the last-modified time of a collection.
    pub fn set_modified(&mut self, collection: impl Into<String>, modified: Timestamp) {
        self.collections.insert(collection.into(), modified);
    }

    /// Returns true if the collection exists and changed after `since`.
    pub fn has_changed_since(&self, collection: &str, since: Timestamp) -> bool {
        self.modified(collection).is_some_and(|m| m > since)
    }

    /// Iterates over the collection names.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

/// Per-engine entry in `meta/global`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMeta {
    /// Record format version of the engine.
    pub version: u32,
    /// Identifier that changes whenever the engine's data is reset.
    pub sync_id: String,
}

/// The `meta/global` document: storage format and enabled engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaGlobal {
    /// Storage format version of the whole account.
    pub storage_version: u32,
    /// Account-wide sync identifier.
    pub sync_id: String,
    /// Enabled engines keyed by collection name.
    #[serde(default)]
    pub engines: BTreeMap<String, EngineMeta>,
    /// Engines a user explicitly turned off.
    #[serde(default)]
    pub declined: Vec<String>,
}

impl MetaGlobal {
    /// Creates a document at the current storage version with no engines.
    pub fn new(sync_id: impl Into<String>) -> Self {
        Self {
            storage_version: STORAGE_VERSION,
            sync_id: sync_id.into(),
            engines: BTreeMap::new(),
            declined: Vec::new(),
        }
    }

    /// Adds an enabled engine.
    pub fn with_engine(mut self, collection: impl Into<String>, version: u32) -> Self {
        let collection = collection.into();
        let sync_id = format!("{}-{}", self.sync_id, collection);
        self.engines.insert(collection, EngineMeta { version, sync_id });
        self
    }

    /// Marks an engine as declined.
    pub fn with_declined(mut self, collection: impl Into<String>) -> Self {
        self.declined.push(collection.into());
        self
    }

    /// Returns the engine entry for a collection.
    pub fn engine(&self, collection: &str) -> Option<&EngineMeta> {
        self.engines.get(collection)
    }

    /// Returns true if the engine is enabled and not declined.
    pub fn is_engine_enabled(&self, collection: &str) -> bool {
        self.engines.contains_key(collection) && !self.declined.iter().any(|d| d == collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_collections_lookup() {
        let info = InfoCollections::from_pairs([("history", 1_000), ("passwords", 2_000)]);
        assert_eq!(info.modified("history"), Some(1_000));
        assert_eq!(info.modified("bookmarks"), None);
        assert!(info.has_changed_since("passwords", 1_999));
        assert!(!info.has_changed_since("passwords", 2_000));
        assert!(!info.has_changed_since("bookmarks", 0));
    }

    #[test]
    fn info_collections_is_a_flat_map() {
        let info = InfoCollections::from_pairs([("history", 5)]);
        assert_eq!(serde_json::to_string(&info).unwrap(), r#"{"history":5}"#);
    }

    #[test]
    fn declined_engines_are_disabled() {
        let meta = MetaGlobal::new("sync")
            .with_engine("history", 1)
            .with_engine("passwords", 1)
            .with_declined("passwords");

        assert!(meta.is_engine_enabled("history"));
        assert!(!meta.is_engine_enabled("passwords"));
        assert!(!meta.is_engine_enabled("tabs"));
        assert_eq!(meta.engine("history").map(|e| e.version), Some(1));
    }
}
