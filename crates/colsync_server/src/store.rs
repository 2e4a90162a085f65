//! Server-side collection storage.

use crate::error::{ServerError, ServerResult};
use colsync_protocol::{Bso, GetParams, Guid, InfoCollections, PostResult, SortOrder, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Collection {
    records: BTreeMap<Guid, Bso>,
    modified: Timestamp,
}

/// One page of a collection read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePage {
    /// Records in the requested order.
    pub records: Vec<Bso>,
    /// Offset of the next page, if more records remain.
    pub next_offset: Option<String>,
    /// Collection last-modified time.
    pub modified: Timestamp,
}

/// Versioned record collections with a logical clock.
///
/// Every successful write advances the clock by a fixed step and stamps the
/// written records with the new time, so timestamps are strictly increasing
/// across writes.
pub struct CollectionStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    clock: Mutex<Timestamp>,
    step: Timestamp,
}

impl CollectionStore {
    /// Creates an empty store whose clock starts at `start_time`.
    pub fn new(start_time: Timestamp, step: Timestamp) -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            clock: Mutex::new(start_time),
            step: step.max(1),
        }
    }

    /// Returns the current clock value.
    pub fn now(&self) -> Timestamp {
        *self.clock.lock()
    }

    fn tick(&self) -> Timestamp {
        let mut clock = self.clock.lock();
        *clock += self.step;
        *clock
    }

    /// Returns the last-modified time of every non-empty collection.
    pub fn info_collections(&self) -> InfoCollections {
        let collections = self.collections.read();
        InfoCollections::from_pairs(
            collections
                .iter()
                .map(|(name, c)| (name.clone(), c.modified)),
        )
    }

    /// Returns a collection's last-modified time, zero if it does not exist.
    pub fn modified(&self, collection: &str) -> Timestamp {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |c| c.modified)
    }

    /// Returns the number of records in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |c| c.records.len())
    }

    /// Returns a single record.
    pub fn record(&self, collection: &str, id: &Guid) -> Option<Bso> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.records.get(id).cloned())
    }

    /// Removes a collection.
    pub fn delete_collection(&self, collection: &str) -> bool {
        self.collections.write().remove(collection).is_some()
    }

    /// Reads one page of a collection.
    ///
    /// `newer` is exclusive. The offset is the number of matching records
    /// already returned for the same query.
    pub fn get(
        &self,
        collection: &str,
        params: &GetParams,
        max_page_size: usize,
    ) -> ServerResult<StorePage> {
        let collections = self.collections.read();
        let Some(coll) = collections.get(collection) else {
            return Ok(StorePage {
                records: Vec::new(),
                next_offset: None,
                modified: 0,
            });
        };

        check_unmodified_since(collection, coll.modified, params.if_unmodified_since)?;

        let offset = match &params.offset {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ServerError::InvalidRequest(format!("bad offset {token:?}")))?,
            None => 0,
        };
        let limit = params.limit.unwrap_or(max_page_size).min(max_page_size);
        let newer = params.newer.unwrap_or(0);
        let now = self.now();

        let mut matching: Vec<&Bso> = coll
            .records
            .values()
            .filter(|r| r.modified > newer && !is_expired(r, now))
            .collect();
        match params.sort.unwrap_or_default() {
            SortOrder::Oldest => matching.sort_by_key(|r| (r.modified, r.id.clone())),
            SortOrder::Newest => matching.sort_by_key(|r| (Reverse(r.modified), r.id.clone())),
            SortOrder::Index => {
                matching.sort_by_key(|r| (Reverse(r.sortindex.unwrap_or(0)), r.id.clone()))
            }
        }

        let records: Vec<Bso> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|r| (*r).clone())
            .collect();
        let consumed = offset + records.len();
        let next_offset = (consumed < matching.len()).then(|| consumed.to_string());

        Ok(StorePage {
            records,
            next_offset,
            modified: coll.modified,
        })
    }

    /// Writes records to a collection.
    ///
    /// Records whose payload exceeds `max_payload_bytes` or whose ID is empty
    /// are reported as failed. Accepted records are stamped with a single new
    /// server time.
    pub fn post(
        &self,
        collection: &str,
        records: &[Bso],
        if_unmodified_since: Option<Timestamp>,
        max_payload_bytes: usize,
    ) -> ServerResult<PostResult> {
        let mut collections = self.collections.write();
        let current = collections.get(collection).map_or(0, |c| c.modified);
        check_unmodified_since(collection, current, if_unmodified_since)?;

        let modified = self.tick();
        let mut success = Vec::new();
        let mut failed = Vec::new();
        let coll = collections.entry(collection.to_string()).or_default();

        for record in records {
            if record.id.is_empty() || record.payload_size() > max_payload_bytes {
                failed.push(record.id.clone());
                continue;
            }
            let mut stored = record.clone();
            stored.modified = modified;
            coll.records.insert(stored.id.clone(), stored);
            success.push(record.id.clone());
        }

        if !success.is_empty() {
            coll.modified = modified;
        }
        let empty = coll.records.is_empty();
        if empty {
            collections.remove(collection);
        }

        Ok(PostResult {
            modified,
            success,
            failed,
        })
    }
}

fn check_unmodified_since(
    collection: &str,
    modified: Timestamp,
    since: Option<Timestamp>,
) -> ServerResult<()> {
    match since {
        Some(since) if modified > since => Err(ServerError::PreconditionFailed {
            collection: collection.to_string(),
            modified,
            since,
        }),
        _ => Ok(()),
    }
}

fn is_expired(record: &Bso, now: Timestamp) -> bool {
    record
        .ttl
        .is_some_and(|ttl| record.modified + u64::from(ttl) * 1000 < now)
}
