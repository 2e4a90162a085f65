//! Storage client abstraction and typed collection access.

use crate::error::{SyncError, SyncResult};
use colsync_protocol::{
    Bso, CleartextPayload, CollectionPage, GetParams, Guid, InfoCollections, MetaGlobal,
    PostResult, Record, Response, ResponseMetadata, Timestamp,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::marker::PhantomData;
use tracing::warn;

/// Access to a remote versioned collection store.
///
/// This trait abstracts the network layer. A `412 Precondition Failed`
/// response must be reported as [`SyncError::PreconditionFailed`] so callers
/// can tell it apart from other failures.
pub trait StorageClient: Send + Sync {
    /// Fetches `info/collections`.
    fn info_collections(&self) -> SyncResult<Response<InfoCollections>>;

    /// Fetches `meta/global`.
    fn meta_global(&self) -> SyncResult<Response<MetaGlobal>>;

    /// Fetches one page of a collection.
    fn get(&self, collection: &str, params: &GetParams) -> SyncResult<Response<CollectionPage>>;

    /// Uploads records to a collection.
    fn post(
        &self,
        collection: &str,
        records: &[Bso],
        if_unmodified_since: Option<Timestamp>,
    ) -> SyncResult<Response<PostResult>>;

    /// Returns the seconds left on a server-requested backoff, if any.
    fn backoff_remaining(&self) -> Option<u64>;

    /// Returns true if the client holds usable credentials.
    fn is_authenticated(&self) -> bool;
}

/// Server-side state a sync run is planned against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteState {
    /// Last-modified time per collection.
    pub info: InfoCollections,
    /// Storage format and enabled engines.
    pub meta: MetaGlobal,
}

impl RemoteState {
    /// Creates a remote state from its parts.
    pub fn new(info: InfoCollections, meta: MetaGlobal) -> Self {
        Self { info, meta }
    }

    /// Fetches both documents from the server.
    pub fn fetch(client: &dyn StorageClient) -> SyncResult<Self> {
        let info = client.info_collections()?.value;
        let meta = client.meta_global()?.value;
        Ok(Self { info, meta })
    }
}

/// A decoded page of records.
#[derive(Debug, Clone)]
pub struct RecordPage<T> {
    /// Records that decoded and validated.
    pub records: Vec<Record<T>>,
    /// IDs of records that were malformed or invalid.
    pub rejected: Vec<Guid>,
    /// Continuation token, if more records remain.
    pub next_offset: Option<String>,
    /// Collection last-modified time reported by the server.
    pub last_modified: Option<Timestamp>,
}

impl<T> Default for RecordPage<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
            next_offset: None,
            last_modified: None,
        }
    }
}

/// Typed access to one collection.
pub struct CollectionClient<'a, T> {
    client: &'a dyn StorageClient,
    collection: String,
    _payload: PhantomData<fn() -> T>,
}

impl<'a, T: CleartextPayload> CollectionClient<'a, T> {
    /// Creates a client for a collection.
    pub fn new(client: &'a dyn StorageClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
            _payload: PhantomData,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the underlying storage client.
    pub fn storage(&self) -> &'a dyn StorageClient {
        self.client
    }

    /// Fetches everything modified after `since`.
    pub fn get_since(&self, since: Timestamp) -> SyncResult<RecordPage<T>> {
        self.get(&GetParams::since(since))
    }

    /// Fetches and decodes one page.
    ///
    /// Records that fail to decode are returned as `rejected` rather than
    /// failing the whole page.
    pub fn get(&self, params: &GetParams) -> SyncResult<RecordPage<T>> {
        let response = self.client.get(&self.collection, params)?;
        let mut page = RecordPage {
            records: Vec::with_capacity(response.value.records.len()),
            rejected: Vec::new(),
            next_offset: response.metadata.next_offset,
            last_modified: response.metadata.last_modified,
        };

        for bso in &response.value.records {
            match Record::<T>::from_bso(bso) {
                Ok(record) => page.records.push(record),
                Err(err) => {
                    warn!(collection = %self.collection, id = %bso.id, error = %err, "rejecting record");
                    page.rejected.push(bso.id.clone());
                }
            }
        }

        Ok(page)
    }

    /// Encodes and uploads records.
    pub fn post(
        &self,
        records: &[Record<T>],
        if_unmodified_since: Option<Timestamp>,
    ) -> SyncResult<Response<PostResult>> {
        let bsos = records
            .iter()
            .map(Record::to_bso)
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .post(&self.collection, &bsos, if_unmodified_since)
    }
}

/// A GET issued against a [`MockStorageClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedGet {
    /// Collection name.
    pub collection: String,
    /// Query parameters.
    pub params: GetParams,
}

/// A POST issued against a [`MockStorageClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    /// Collection name.
    pub collection: String,
    /// IDs of the uploaded records, in order.
    pub ids: Vec<Guid>,
    /// Precondition sent with the request.
    pub if_unmodified_since: Option<Timestamp>,
}

/// A scripted storage client for testing.
///
/// GET responses are served from a queue. POSTs are served from their own
/// queue, or, when it is empty, accepted in full with a server time that
/// advances by `post_step` per request.
#[derive(Debug)]
pub struct MockStorageClient {
    state: Mutex<MockState>,
}

#[derive(Debug)]
struct MockState {
    info: InfoCollections,
    meta: Option<MetaGlobal>,
    gets: VecDeque<SyncResult<Response<CollectionPage>>>,
    posts: VecDeque<SyncResult<Response<PostResult>>>,
    recorded_gets: Vec<RecordedGet>,
    recorded_posts: Vec<RecordedPost>,
    clock: Timestamp,
    post_step: Timestamp,
    backoff: Option<u64>,
    authenticated: bool,
}

impl MockStorageClient {
    /// Creates a mock whose automatic POST times start after `clock`.
    pub fn new(clock: Timestamp) -> Self {
        Self {
            state: Mutex::new(MockState {
                info: InfoCollections::new(),
                meta: None,
                gets: VecDeque::new(),
                posts: VecDeque::new(),
                recorded_gets: Vec::new(),
                recorded_posts: Vec::new(),
                clock,
                post_step: 10,
                backoff: None,
                authenticated: true,
            }),
        }
    }

    /// Sets the `info/collections` response.
    pub fn set_info_collections(&self, info: InfoCollections) {
        self.state.lock().info = info;
    }

    /// Sets the `meta/global` response.
    pub fn set_meta_global(&self, meta: MetaGlobal) {
        self.state.lock().meta = Some(meta);
    }

    /// Queues a GET outcome.
    pub fn push_get(&self, result: SyncResult<Response<CollectionPage>>) {
        self.state.lock().gets.push_back(result);
    }

    /// Queues a successful GET page.
    pub fn push_page(
        &self,
        records: Vec<Bso>,
        last_modified: Timestamp,
        next_offset: Option<String>,
    ) {
        let metadata = ResponseMetadata {
            last_modified: Some(last_modified),
            next_offset,
            backoff_seconds: None,
        };
        self.push_get(Ok(Response::new(CollectionPage::new(records), metadata)));
    }

    /// Queues a POST outcome.
    pub fn push_post(&self, result: SyncResult<Response<PostResult>>) {
        self.state.lock().posts.push_back(result);
    }

    /// Sets the backoff reported by the client.
    pub fn set_backoff(&self, seconds: Option<u64>) {
        self.state.lock().backoff = seconds;
    }

    /// Sets whether the client is authenticated.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.state.lock().authenticated = authenticated;
    }

    /// Returns every GET issued so far.
    pub fn recorded_gets(&self) -> Vec<RecordedGet> {
        self.state.lock().recorded_gets.clone()
    }

    /// Returns every POST issued so far.
    pub fn recorded_posts(&self) -> Vec<RecordedPost> {
        self.state.lock().recorded_posts.clone()
    }
}

impl Default for MockStorageClient {
    fn default() -> Self {
        Self::new(0)
    }
}

impl StorageClient for MockStorageClient {
    fn info_collections(&self) -> SyncResult<Response<InfoCollections>> {
        let state = self.state.lock();
        Ok(Response::new(state.info.clone(), ResponseMetadata::default()))
    }

    fn meta_global(&self) -> SyncResult<Response<MetaGlobal>> {
        let state = self.state.lock();
        state
            .meta
            .clone()
            .map(|meta| Response::new(meta, ResponseMetadata::default()))
            .ok_or_else(|| SyncError::ServerError("no mock meta/global set".into()))
    }

    fn get(&self, collection: &str, params: &GetParams) -> SyncResult<Response<CollectionPage>> {
        let mut state = self.state.lock();
        state.recorded_gets.push(RecordedGet {
            collection: collection.to_string(),
            params: params.clone(),
        });
        state
            .gets
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::ServerError("no mock GET response queued".into())))
    }

    fn post(
        &self,
        collection: &str,
        records: &[Bso],
        if_unmodified_since: Option<Timestamp>,
    ) -> SyncResult<Response<PostResult>> {
        let mut state = self.state.lock();
        let ids: Vec<Guid> = records.iter().map(|r| r.id.clone()).collect();
        state.recorded_posts.push(RecordedPost {
            collection: collection.to_string(),
            ids: ids.clone(),
            if_unmodified_since,
        });

        if let Some(result) = state.posts.pop_front() {
            return result;
        }

        state.clock += state.post_step;
        let modified = state.clock;
        let metadata = ResponseMetadata {
            last_modified: Some(modified),
            ..ResponseMetadata::default()
        };
        Ok(Response::new(
            PostResult {
                modified,
                success: ids,
                failed: Vec::new(),
            },
            metadata,
        ))
    }

    fn backoff_remaining(&self) -> Option<u64> {
        self.state.lock().backoff
    }

    fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colsync_protocol::{HistoryPayload, Visit, VisitType};

    fn history_bso(id: &str, modified: Timestamp) -> Bso {
        let payload = HistoryPayload {
            id: Guid::new(id),
            hist_uri: format!("https://example.com/{id}"),
            title: id.to_string(),
            visits: vec![Visit::new(1_000, VisitType::Link)],
            deleted: false,
        };
        let mut bso = Record::new(payload, 1, None).to_bso().unwrap();
        bso.modified = modified;
        bso
    }

    #[test]
    fn collection_get_separates_rejected_records() {
        let mock = MockStorageClient::new(0);
        let broken = Bso {
            id: Guid::new("broken"),
            modified: 5,
            sortindex: None,
            ttl: None,
            payload: "{".into(),
        };
        mock.push_page(vec![history_bso("a", 4), broken], 5, None);

        let client = CollectionClient::<HistoryPayload>::new(&mock, "history");
        let page = client.get_since(0).unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].modified, 4);
        assert_eq!(page.rejected, vec![Guid::new("broken")]);
        assert_eq!(page.last_modified, Some(5));
        assert_eq!(mock.recorded_gets()[0].params.newer, Some(0));
    }

    #[test]
    fn mock_accepts_posts_by_default() {
        let mock = MockStorageClient::new(100);
        let client = CollectionClient::<HistoryPayload>::new(&mock, "history");
        let record = Record::<HistoryPayload>::deletion(Guid::new("gone"), None);

        let response = client.post(&[record], Some(100)).unwrap();
        assert_eq!(response.value.success, vec![Guid::new("gone")]);
        assert_eq!(response.metadata.last_modified, Some(110));

        let posts = mock.recorded_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].if_unmodified_since, Some(100));
    }

    #[test]
    fn mock_scripted_errors() {
        let mock = MockStorageClient::default();
        mock.push_get(Err(SyncError::PreconditionFailed {
            collection: "history".into(),
        }));

        let result = mock.get("history", &GetParams::default());
        assert!(matches!(result, Err(SyncError::PreconditionFailed { .. })));
        assert!(mock.get("history", &GetParams::default()).is_err());
        assert!(mock.meta_global().is_err());
    }

    #[test]
    fn remote_state_fetch() {
        let mock = MockStorageClient::default();
        mock.set_info_collections(InfoCollections::from_pairs([("history", 9)]));
        mock.set_meta_global(MetaGlobal::new("sync").with_engine("history", 1));

        let remote = RemoteState::fetch(&mock).unwrap();
        assert_eq!(remote.info.modified("history"), Some(9));
        assert!(remote.meta.is_engine_enabled("history"));
    }
}
