//! Main reference server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::CollectionStore;
use colsync_protocol::{
    Bso, CollectionPage, GetParams, InfoCollections, MetaGlobal, PostResult, Response, Timestamp,
};
use std::sync::Arc;

/// The reference collection server.
///
/// This server keeps every collection in memory and serves the same
/// requests a real storage node would: `info/collections`, `meta/global`,
/// paged collection reads and conditional writes.
///
/// # Example
///
/// ```
/// use colsync_server::{SyncServer, ServerConfig};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let info = server.handle_info_collections().unwrap();
/// assert!(info.value.modified("history").is_none());
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new server.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(CollectionStore::new(config.start_time, config.clock_step));
        Self::with_store(config, store)
    }

    /// Creates a server with an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<CollectionStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles `GET info/collections`.
    pub fn handle_info_collections(&self) -> ServerResult<Response<InfoCollections>> {
        self.handler.handle_info_collections()
    }

    /// Handles `GET meta/global`.
    pub fn handle_meta_global(&self) -> ServerResult<Response<MetaGlobal>> {
        self.handler.handle_meta_global()
    }

    /// Handles a collection GET.
    pub fn handle_get(
        &self,
        collection: &str,
        params: &GetParams,
    ) -> ServerResult<Response<CollectionPage>> {
        self.handler.handle_get(collection, params)
    }

    /// Handles a collection POST.
    pub fn handle_post(
        &self,
        collection: &str,
        records: &[Bso],
        if_unmodified_since: Option<Timestamp>,
    ) -> ServerResult<Response<PostResult>> {
        self.handler
            .handle_post(collection, records, if_unmodified_since)
    }

    /// Writes records directly, bypassing the per-request limit.
    ///
    /// Used to seed collections for tests and simulations.
    pub fn seed(&self, collection: &str, records: &[Bso]) -> ServerResult<Timestamp> {
        let max = self.context.config.max_records_per_post.max(1);
        let mut modified = self.context.store.modified(collection);
        for chunk in records.chunks(max) {
            modified = self.handler.handle_post(collection, chunk, None)?.value.modified;
        }
        Ok(modified)
    }

    /// Replaces `meta/global`. `None` makes it missing.
    pub fn set_meta_global(&self, meta: Option<MetaGlobal>) {
        self.context.set_meta_global(meta);
    }

    /// Sets the backoff advertised on every response.
    pub fn set_backoff(&self, seconds: Option<u64>) {
        self.context.set_backoff(seconds);
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<CollectionStore> {
        &self.context.store
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colsync_protocol::Guid;

    fn bso(id: String) -> Bso {
        Bso {
            id: Guid::new(id),
            modified: 0,
            sortindex: None,
            ttl: None,
            payload: "{}".into(),
        }
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::new(ServerConfig::default());
        assert!(server.handle_meta_global().is_ok());
        assert_eq!(server.store().len("history"), 0);
    }

    #[test]
    fn seed_bypasses_post_limit() {
        let server = SyncServer::new(ServerConfig::default().with_max_records_per_post(2));
        let records: Vec<Bso> = (0..5).map(|i| bso(format!("r{i}"))).collect();

        let modified = server.seed("history", &records).unwrap();
        assert_eq!(server.store().len("history"), 5);
        assert_eq!(server.store().modified("history"), modified);
    }

    #[test]
    fn full_round_trip() {
        let server = SyncServer::new(ServerConfig::default());

        let posted = server
            .handle_post("passwords", &[bso("a".into())], Some(0))
            .unwrap();
        assert!(posted.value.is_complete_success());

        let page = server
            .handle_get("passwords", &GetParams::since(0))
            .unwrap();
        assert_eq!(page.value.records.len(), 1);
        assert_eq!(page.value.records[0].modified, posted.value.modified);
    }

    #[test]
    fn shared_store() {
        let store = Arc::new(CollectionStore::new(0, 1));
        let server = SyncServer::with_store(ServerConfig::default(), Arc::clone(&store));
        server
            .handle_post("history", &[bso("a".into())], None)
            .unwrap();
        assert_eq!(store.len("history"), 1);
    }
}
