//! Chunked, sequential upload of records.

use crate::client::CollectionClient;
use crate::error::SyncResult;
use crate::stats::SyncUploadStats;
use colsync_protocol::{CleartextPayload, PostResult, Record, Timestamp};
use tracing::debug;

/// Uploads `records` in chunks of at most `chunk_size`, in order.
///
/// Each chunk is sent with `X-If-Unmodified-Since` set to the server time
/// returned for the previous chunk (`last_timestamp` for the first).
/// `on_upload` sees every chunk's result and server time before the next
/// chunk is sent. Returns the last server time.
///
/// The first failing request stops the upload. Chunks already sent keep the
/// effects of their callbacks.
pub fn upload_records<T, F>(
    client: &CollectionClient<'_, T>,
    records: &[Record<T>],
    last_timestamp: Timestamp,
    chunk_size: usize,
    stats: &mut SyncUploadStats,
    mut on_upload: F,
) -> SyncResult<Timestamp>
where
    T: CleartextPayload,
    F: FnMut(&PostResult, Timestamp) -> SyncResult<()>,
{
    let mut timestamp = last_timestamp;

    for chunk in records.chunks(chunk_size.max(1)) {
        let response = client.post(chunk, Some(timestamp))?;
        let result = response.value;
        let modified = response.metadata.last_modified.unwrap_or(result.modified);

        debug!(
            collection = client.collection(),
            sent = result.success.len(),
            failed = result.failed.len(),
            modified,
            "uploaded chunk"
        );

        *stats += SyncUploadStats {
            sent: result.success.len(),
            sent_failed: result.failed.len(),
        };
        on_upload(&result, modified)?;

        timestamp = timestamp.max(modified);
    }

    Ok(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockStorageClient;
    use crate::error::SyncError;
    use colsync_protocol::{Guid, LoginPayload, Response, ResponseMetadata};

    fn deletions(count: usize) -> Vec<Record<LoginPayload>> {
        (0..count)
            .map(|i| Record::deletion(Guid::new(format!("login{i:07}")), None))
            .collect()
    }

    #[test]
    fn chunks_thread_the_server_timestamp() {
        let mock = MockStorageClient::new(1_000);
        let client = CollectionClient::new(&mock, "passwords");
        let records = deletions(2_500);
        let mut stats = SyncUploadStats::default();
        let mut seen = Vec::new();

        let last = upload_records(&client, &records, 1_000, 1_000, &mut stats, |result, ts| {
            seen.push((result.success.len(), ts));
            Ok(())
        })
        .unwrap();

        let posts = mock.recorded_posts();
        let sizes: Vec<usize> = posts.iter().map(|p| p.ids.len()).collect();
        assert_eq!(sizes, [1_000, 1_000, 500]);

        let preconditions: Vec<_> = posts.iter().map(|p| p.if_unmodified_since).collect();
        assert_eq!(preconditions, [Some(1_000), Some(1_010), Some(1_020)]);

        assert_eq!(seen, [(1_000, 1_010), (1_000, 1_020), (500, 1_030)]);
        assert_eq!(last, 1_030);
        assert_eq!(stats.sent, 2_500);
        assert_eq!(stats.sent_failed, 0);

        // Order is preserved across chunks.
        assert_eq!(posts[1].ids[0], Guid::new("login0001000"));
    }

    #[test]
    fn partial_failures_are_counted() {
        let mock = MockStorageClient::new(0);
        mock.push_post(Ok(Response::new(
            PostResult {
                modified: 7,
                success: vec![Guid::new("login0000000")],
                failed: vec![Guid::new("login0000001")],
            },
            ResponseMetadata::default(),
        )));
        let client = CollectionClient::new(&mock, "passwords");
        let mut stats = SyncUploadStats::default();

        let last = upload_records(&client, &deletions(2), 0, 10, &mut stats, |_, _| Ok(())).unwrap();

        // Missing X-Last-Modified falls back to the body's time.
        assert_eq!(last, 7);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.sent_failed, 1);
    }

    #[test]
    fn transport_error_aborts_the_fold() {
        let mock = MockStorageClient::new(0);
        mock.push_post(Ok(Response::new(
            PostResult {
                modified: 5,
                success: vec![Guid::new("login0000000")],
                failed: vec![],
            },
            ResponseMetadata {
                last_modified: Some(5),
                ..ResponseMetadata::default()
            },
        )));
        mock.push_post(Err(SyncError::transport_retryable("connection reset")));
        let client = CollectionClient::new(&mock, "passwords");
        let mut stats = SyncUploadStats::default();
        let mut callbacks = 0;

        let result = upload_records(&client, &deletions(3), 0, 1, &mut stats, |_, _| {
            callbacks += 1;
            Ok(())
        });

        assert!(matches!(result, Err(SyncError::Transport { .. })));
        assert_eq!(callbacks, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(mock.recorded_posts().len(), 2);
    }

    #[test]
    fn nothing_to_upload() {
        let mock = MockStorageClient::new(0);
        let client = CollectionClient::<LoginPayload>::new(&mock, "passwords");
        let mut stats = SyncUploadStats::default();

        let last = upload_records(&client, &[], 42, 100, &mut stats, |_, _| Ok(())).unwrap();
        assert_eq!(last, 42);
        assert!(mock.recorded_posts().is_empty());
    }
}
