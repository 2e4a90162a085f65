//! In-process storage client.
//!
//! Routes [`StorageClient`] calls straight into a [`SyncServer`] and maps
//! server errors onto the engine's error kinds the way a network client
//! would map status codes.

use colsync_engine::{StorageClient, SyncError, SyncResult};
use colsync_protocol::{
    Bso, CollectionPage, GetParams, InfoCollections, MetaGlobal, PostResult, Response, Timestamp,
};
use colsync_server::{ServerError, ServerResult, SyncServer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A [`StorageClient`] backed by an in-process [`SyncServer`].
pub struct LoopbackClient {
    server: Arc<SyncServer>,
    backoff: Mutex<Option<u64>>,
    authenticated: AtomicBool,
    failures_pending: AtomicUsize,
    gets: AtomicUsize,
    posts: AtomicUsize,
}

impl LoopbackClient {
    /// Creates an authenticated client for `server`.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self {
            server,
            backoff: Mutex::new(None),
            authenticated: AtomicBool::new(true),
            failures_pending: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            posts: AtomicUsize::new(0),
        }
    }

    /// Returns the server this client talks to.
    pub fn server(&self) -> &Arc<SyncServer> {
        &self.server
    }

    /// Drops or restores credentials.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Forgets any backoff the server asked for.
    pub fn clear_backoff(&self) {
        *self.backoff.lock() = None;
    }

    /// Makes the next `count` collection requests fail with a retryable
    /// transport error.
    pub fn fail_next_requests(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of collection GETs issued.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of collection POSTs issued.
    pub fn post_count(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    fn check_request(&self) -> SyncResult<()> {
        if !self.is_authenticated() {
            return Err(SyncError::NotAuthorized("no credentials".into()));
        }
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::transport_retryable("injected network failure"));
        }
        Ok(())
    }

    fn finish<T>(&self, result: ServerResult<Response<T>>) -> SyncResult<Response<T>> {
        let response = result.map_err(map_server_error)?;
        *self.backoff.lock() = response.metadata.backoff_seconds;
        Ok(response)
    }
}

/// Maps a server error onto the error a network client would report.
pub fn map_server_error(err: ServerError) -> SyncError {
    match err {
        ServerError::PreconditionFailed { collection, .. } => {
            SyncError::PreconditionFailed { collection }
        }
        ServerError::NotAuthorized(message) => SyncError::NotAuthorized(message),
        ServerError::Internal(message) => SyncError::ServerError(message),
        other => SyncError::transport_fatal(other.to_string()),
    }
}

impl StorageClient for LoopbackClient {
    fn info_collections(&self) -> SyncResult<Response<InfoCollections>> {
        self.check_request()?;
        self.finish(self.server.handle_info_collections())
    }

    fn meta_global(&self) -> SyncResult<Response<MetaGlobal>> {
        self.check_request()?;
        self.finish(self.server.handle_meta_global())
    }

    fn get(&self, collection: &str, params: &GetParams) -> SyncResult<Response<CollectionPage>> {
        self.check_request()?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.finish(self.server.handle_get(collection, params))
    }

    fn post(
        &self,
        collection: &str,
        records: &[Bso],
        if_unmodified_since: Option<Timestamp>,
    ) -> SyncResult<Response<PostResult>> {
        self.check_request()?;
        self.posts.fetch_add(1, Ordering::SeqCst);
        self.finish(
            self.server
                .handle_post(collection, records, if_unmodified_since),
        )
    }

    fn backoff_remaining(&self) -> Option<u64> {
        *self.backoff.lock()
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}
