use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use coffer_blob::{BlobDownload, BlobError, BlobMetadata, BlobStore, ByteStream, Checksum};
use coffer_core::BlobId;

use crate::config::ChunkedConfig;

/// Descriptor in the `files` collection.
#[derive(Debug, Clone)]
struct FileDoc {
    metadata: BlobMetadata,
    chunk_count: u32,
}

/// Key of a document in the `chunks` collection: owning blob and sequence number.
type ChunkKey = (BlobId, u32);

#[derive(Debug, Default)]
struct Collections {
    files: DashMap<BlobId, FileDoc>,
    chunks: DashMap<ChunkKey, Bytes>,
}

/// Chunks written for a blob whose descriptor is not committed yet.
///
/// Dropping the guard without calling [`PendingChunks::commit`] removes every
/// chunk it wrote, which covers both failed sources and cancelled writes.
struct PendingChunks {
    collections: Arc<Collections>,
    id: BlobId,
    count: u32,
    committed: bool,
}

impl PendingChunks {
    fn push(&mut self, data: Bytes) {
        self.collections
            .chunks
            .insert((self.id.clone(), self.count), data);
        self.count += 1;
    }

    fn commit(mut self) -> u32 {
        self.committed = true;
        self.count
    }
}

impl Drop for PendingChunks {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for n in 0..self.count {
            self.collections.chunks.remove(&(self.id.clone(), n));
        }
        if self.count > 0 {
            debug!(blob_id = %self.id, chunks = self.count, "discarded partial blob");
        }
    }
}

/// GridFS-style [`BlobStore`] that splits content into fixed-size chunks.
///
/// Blob descriptors live in a `files` collection and content in a `chunks`
/// collection keyed by `(blob_id, n)`. The descriptor is inserted only after
/// the last chunk, so readers never observe a partially written blob.
#[derive(Debug, Default)]
pub struct ChunkedBlobStore {
    collections: Arc<Collections>,
    config: ChunkedConfig,
}

impl ChunkedBlobStore {
    /// Create an empty store with the default chunk size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with the given configuration.
    pub fn with_config(config: ChunkedConfig) -> Self {
        Self {
            collections: Arc::default(),
            config,
        }
    }

    /// Number of chunk documents currently stored, across all blobs.
    pub fn chunk_count(&self) -> usize {
        self.collections.chunks.len()
    }
}

#[async_trait]
impl BlobStore for ChunkedBlobStore {
    async fn write(
        &self,
        filename: &str,
        content_type: &str,
        mut data: ByteStream<'_>,
    ) -> Result<BlobMetadata, BlobError> {
        let chunk_size = self.config.effective_chunk_size();
        let id = BlobId::new(Uuid::now_v7().to_string());
        let mut pending = PendingChunks {
            collections: Arc::clone(&self.collections),
            id: id.clone(),
            count: 0,
            committed: false,
        };
        let mut checksum = Checksum::new();
        let mut buf = BytesMut::with_capacity(chunk_size);

        while let Some(item) = data.next().await {
            let piece = item.map_err(|source| BlobError::Transfer {
                offset: checksum.len(),
                source,
            })?;
            checksum.update(&piece);

            let mut rest = &piece[..];
            while !rest.is_empty() {
                let take = (chunk_size - buf.len()).min(rest.len());
                buf.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if buf.len() == chunk_size {
                    pending.push(buf.split().freeze());
                }
            }
        }
        if !buf.is_empty() {
            pending.push(buf.freeze());
        }

        let (size_bytes, checksum_sha256) = checksum.finish();
        let metadata = BlobMetadata {
            id: id.clone(),
            filename: filename.to_owned(),
            content_type: content_type.to_owned(),
            size_bytes,
            checksum_sha256,
            created_at: coffer_core::now(),
        };
        let chunk_count = pending.commit();
        self.collections.files.insert(
            id,
            FileDoc {
                metadata: metadata.clone(),
                chunk_count,
            },
        );

        debug!(blob_id = %metadata.id, bytes = size_bytes, chunks = chunk_count, "blob written");
        Ok(metadata)
    }

    async fn read(&self, id: &BlobId) -> Result<Option<BlobDownload>, BlobError> {
        let Some(doc) = self.collections.files.get(id).map(|d| d.clone()) else {
            return Ok(None);
        };

        let collections = Arc::clone(&self.collections);
        let blob_id = id.clone();
        let stream = stream::iter(0..doc.chunk_count)
            .map(move |n| {
                collections
                    .chunks
                    .get(&(blob_id.clone(), n))
                    .map(|chunk| chunk.clone())
                    .ok_or_else(|| {
                        warn!(blob_id = %blob_id, chunk = n, "chunk missing during read");
                        BlobError::Corrupted(format!("blob {blob_id} is missing chunk {n}"))
                            .into_io()
                    })
            })
            .boxed();

        Ok(Some(BlobDownload {
            metadata: doc.metadata,
            stream,
        }))
    }

    async fn metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>, BlobError> {
        Ok(self
            .collections
            .files
            .get(id)
            .map(|doc| doc.metadata.clone()))
    }

    async fn delete(&self, id: &BlobId) -> Result<bool, BlobError> {
        // Descriptor first: once it is gone the blob is unreachable even if
        // chunk removal is interrupted.
        let Some((_, doc)) = self.collections.files.remove(id) else {
            return Ok(false);
        };
        for n in 0..doc.chunk_count {
            self.collections.chunks.remove(&(id.clone(), n));
        }
        debug!(blob_id = %id, chunks = doc.chunk_count, "blob deleted");
        Ok(true)
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<BlobMetadata>, BlobError> {
        let mut all: Vec<BlobMetadata> = self
            .collections
            .files
            .iter()
            .map(|doc| doc.metadata.clone())
            .collect();
        all.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        if let Some(limit) = limit {
            all.truncate(limit);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use coffer_blob::testing::{pattern, run_blob_store_conformance_tests};
    use coffer_blob::{collect, from_bytes, from_chunks};

    use super::*;

    fn small_store() -> ChunkedBlobStore {
        ChunkedBlobStore::with_config(ChunkedConfig { chunk_size: 4096 })
    }

    #[tokio::test]
    async fn conformance() {
        let store = small_store();
        run_blob_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn content_is_split_into_fixed_chunks() {
        let store = small_store();
        let meta = store
            .write("a.bin", "application/octet-stream", from_bytes(pattern(10_000)))
            .await
            .unwrap();

        // 4096 + 4096 + 1808
        assert_eq!(store.chunk_count(), 3);
        let doc = store.collections.files.get(&meta.id).unwrap().clone();
        assert_eq!(doc.chunk_count, 3);
        let last = store.collections.chunks.get(&(meta.id.clone(), 2)).unwrap();
        assert_eq!(last.len(), 1808);
    }

    #[tokio::test]
    async fn delete_removes_all_chunks() {
        let store = small_store();
        let meta = store
            .write("a.bin", "application/octet-stream", from_bytes(pattern(9_000)))
            .await
            .unwrap();
        assert!(store.chunk_count() > 0);

        assert!(store.delete(&meta.id).await.unwrap());
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn failed_source_leaves_no_chunks() {
        let store = small_store();
        let source = from_chunks(vec![
            Ok(Bytes::from(pattern(12_000))),
            Err(io::Error::other("boom")),
        ]);
        let err = store.write("x", "text/plain", source).await.unwrap_err();
        assert!(matches!(err, BlobError::Transfer { offset: 12_000, .. }));
        assert_eq!(store.chunk_count(), 0);
        assert!(store.collections.files.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_write_leaves_no_chunks() {
        let store = small_store();
        // One chunk arrives, then the client stalls forever.
        let source = stream::iter(vec![Ok::<_, io::Error>(Bytes::from(pattern(9_000)))])
            .chain(stream::pending())
            .boxed();

        let write = store.write("stalled.bin", "text/plain", source);
        let result = tokio::time::timeout(Duration::from_secs(30), write).await;
        assert!(result.is_err(), "write should still be pending");

        assert_eq!(store.chunk_count(), 0, "dropped write should release its chunks");
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_chunk_surfaces_as_stream_error() {
        let store = small_store();
        let meta = store
            .write("a.bin", "application/octet-stream", from_bytes(pattern(10_000)))
            .await
            .unwrap();
        store.collections.chunks.remove(&(meta.id.clone(), 1));

        let download = store.read(&meta.id).await.unwrap().unwrap();
        let err = collect(download.stream).await.unwrap_err();
        assert!(err.to_string().contains("missing chunk 1"));
    }

    #[tokio::test]
    async fn read_is_lazy_per_chunk() {
        let store = small_store();
        let meta = store
            .write("a.bin", "application/octet-stream", from_bytes(pattern(10_000)))
            .await
            .unwrap();

        let mut download = store.read(&meta.id).await.unwrap().unwrap();
        let first = download.stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 4096);

        // Deleting mid-read: chunks already handed out stay valid, later ones fail.
        store.delete(&meta.id).await.unwrap();
        let next = download.stream.next().await.unwrap();
        assert!(next.is_err());
    }
}
