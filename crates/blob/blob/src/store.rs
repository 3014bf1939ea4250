use async_trait::async_trait;
use chrono::{DateTime, Utc};

use coffer_core::BlobId;

use crate::error::BlobError;
use crate::stream::ByteStream;
use crate::types::{BlobDownload, BlobMetadata};

/// Pluggable blob storage backend for record attachments.
///
/// Blobs are immutable: content is written once and only ever read or
/// deleted afterwards. Implementations must be `Send + Sync` and safe for
/// concurrent access.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Consume `data` to completion and store it as a new blob.
    ///
    /// The store assigns a unique ID and computes a `SHA-256` checksum while
    /// the content streams through. The full content is never required to be
    /// resident in memory. If the source stream fails, or the returned future
    /// is dropped before completion, nothing is persisted.
    async fn write(
        &self,
        filename: &str,
        content_type: &str,
        data: ByteStream<'_>,
    ) -> Result<BlobMetadata, BlobError>;

    /// Open a blob for reading.
    ///
    /// Returns `None` if the blob does not exist. Content is fetched lazily as
    /// the returned stream is polled; dropping the stream releases any handle
    /// the backend holds.
    async fn read(&self, id: &BlobId) -> Result<Option<BlobDownload>, BlobError>;

    /// Retrieve only the metadata for a blob.
    async fn metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>, BlobError>;

    /// Delete a blob. Returns `true` if the blob existed.
    async fn delete(&self, id: &BlobId) -> Result<bool, BlobError>;

    /// List stored blobs, oldest first.
    async fn list(&self, limit: Option<usize>) -> Result<Vec<BlobMetadata>, BlobError>;

    /// List up to `limit` blobs that sort after `after`, oldest first.
    ///
    /// Blobs are ordered by `(created_at, id)`, so passing the last entry of
    /// one page as `after` yields the next page even while earlier blobs are
    /// being deleted. The default implementation filters [`list`](Self::list).
    async fn list_after(
        &self,
        after: Option<&BlobMetadata>,
        limit: usize,
    ) -> Result<Vec<BlobMetadata>, BlobError> {
        let mut all = self.list(None).await?;
        all.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(all
            .into_iter()
            .filter(|blob| after.is_none_or(|after| blob.sort_key() > after.sort_key()))
            .take(limit)
            .collect())
    }

    /// Remove writes that started before `older_than` and never completed.
    ///
    /// Only backends that persist content before a write finishes leave such
    /// remains behind. Returns the number of incomplete blobs removed.
    async fn purge_incomplete(&self, older_than: DateTime<Utc>) -> Result<u64, BlobError> {
        let _ = older_than;
        Ok(0)
    }
}
