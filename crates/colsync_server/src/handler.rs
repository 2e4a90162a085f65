//! Request handlers for collection endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::CollectionStore;
use colsync_protocol::{
    Bso, CollectionPage, GetParams, InfoCollections, MetaGlobal, PostResult, Response,
    ResponseMetadata, Timestamp,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Record storage (shared across all handlers).
    pub store: Arc<CollectionStore>,
    meta: RwLock<Option<MetaGlobal>>,
    backoff: RwLock<Option<u64>>,
}

impl HandlerContext {
    /// Creates a context, publishing `meta/global` from the configuration.
    pub fn new(config: ServerConfig, store: Arc<CollectionStore>) -> Self {
        let mut meta = MetaGlobal::new(config.sync_id.clone());
        meta.storage_version = config.storage_version;
        for (collection, version) in &config.engines {
            meta = meta.with_engine(collection.clone(), *version);
        }

        Self {
            config,
            store,
            meta: RwLock::new(Some(meta)),
            backoff: RwLock::new(None),
        }
    }

    /// Replaces `meta/global`. `None` makes it missing.
    pub fn set_meta_global(&self, meta: Option<MetaGlobal>) {
        *self.meta.write() = meta;
    }

    /// Sets the backoff advertised on every response.
    pub fn set_backoff(&self, seconds: Option<u64>) {
        *self.backoff.write() = seconds;
    }

    fn metadata(&self, last_modified: Timestamp, next_offset: Option<String>) -> ResponseMetadata {
        ResponseMetadata {
            last_modified: Some(last_modified),
            next_offset,
            backoff_seconds: *self.backoff.read(),
        }
    }
}

/// Handler for collection requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles `GET info/collections`.
    pub fn handle_info_collections(&self) -> ServerResult<Response<InfoCollections>> {
        let info = self.context.store.info_collections();
        let newest = info
            .collections()
            .filter_map(|c| info.modified(c))
            .max()
            .unwrap_or(0);
        Ok(Response::new(info, self.context.metadata(newest, None)))
    }

    /// Handles `GET meta/global`.
    pub fn handle_meta_global(&self) -> ServerResult<Response<MetaGlobal>> {
        let meta = self
            .context
            .meta
            .read()
            .clone()
            .ok_or_else(|| ServerError::NotFound("meta/global".into()))?;
        Ok(Response::new(meta, self.context.metadata(0, None)))
    }

    /// Handles `GET storage/<collection>`.
    pub fn handle_get(
        &self,
        collection: &str,
        params: &GetParams,
    ) -> ServerResult<Response<CollectionPage>> {
        let page = self
            .context
            .store
            .get(collection, params, self.context.config.max_page_size)?;
        debug!(
            collection,
            returned = page.records.len(),
            more = page.next_offset.is_some(),
            "served GET"
        );
        Ok(Response::new(
            CollectionPage::new(page.records),
            self.context.metadata(page.modified, page.next_offset),
        ))
    }

    /// Handles `POST storage/<collection>`.
    pub fn handle_post(
        &self,
        collection: &str,
        records: &[Bso],
        if_unmodified_since: Option<Timestamp>,
    ) -> ServerResult<Response<PostResult>> {
        let max = self.context.config.max_records_per_post;
        if records.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many records: {} > {}",
                records.len(),
                max
            )));
        }

        let result = self.context.store.post(
            collection,
            records,
            if_unmodified_since,
            self.context.config.max_payload_bytes,
        )?;
        debug!(
            collection,
            success = result.success.len(),
            failed = result.failed.len(),
            modified = result.modified,
            "served POST"
        );
        let last_modified = self.context.store.modified(collection).max(result.modified);
        let metadata = self.context.metadata(last_modified, None);
        Ok(Response::new(result, metadata))
    }
}
