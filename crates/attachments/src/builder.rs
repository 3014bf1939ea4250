use std::sync::Arc;

use coffer_blob::BlobStore;
use coffer_record::RecordStore;

use crate::error::AttachmentError;
use crate::pipe::TransferPipe;
use crate::service::AttachmentService;

/// Fluent builder for constructing an [`AttachmentService`].
///
/// A [`RecordStore`] and a [`BlobStore`] must be supplied. Uploads are
/// unlimited unless [`max_upload_bytes`](Self::max_upload_bytes) is set.
pub struct AttachmentServiceBuilder {
    records: Option<Arc<dyn RecordStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    max_upload_bytes: Option<u64>,
}

impl AttachmentServiceBuilder {
    /// Create a new builder with no stores and no upload limit.
    pub fn new() -> Self {
        Self {
            records: None,
            blobs: None,
            max_upload_bytes: None,
        }
    }

    /// Set the record store implementation.
    #[must_use]
    pub fn records(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.records = Some(store);
        self
    }

    /// Set the blob store implementation.
    #[must_use]
    pub fn blobs(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(store);
        self
    }

    /// Reject uploads larger than `bytes`. Zero removes the limit.
    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = (bytes > 0).then_some(bytes);
        self
    }

    /// Consume the builder and construct an [`AttachmentService`].
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::Configuration`] if either store is missing.
    pub fn build(self) -> Result<AttachmentService, AttachmentError> {
        let records = self
            .records
            .ok_or_else(|| AttachmentError::Configuration("record store is required".into()))?;

        let blobs = self
            .blobs
            .ok_or_else(|| AttachmentError::Configuration("blob store is required".into()))?;

        Ok(AttachmentService::with_pipe(
            records,
            blobs,
            TransferPipe::new(self.max_upload_bytes),
        ))
    }
}

impl Default for AttachmentServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use coffer_blob_chunked::ChunkedBlobStore;
    use coffer_record_memory::MemoryRecordStore;

    use super::*;

    #[test]
    fn build_requires_both_stores() {
        let err = AttachmentServiceBuilder::new()
            .blobs(Arc::new(ChunkedBlobStore::new()))
            .build()
            .err()
            .expect("missing record store should fail");
        assert!(matches!(err, AttachmentError::Configuration(_)));

        let err = AttachmentServiceBuilder::new()
            .records(Arc::new(MemoryRecordStore::new()))
            .build()
            .err()
            .expect("missing blob store should fail");
        assert!(err.to_string().contains("blob store is required"));
    }

    #[test]
    fn upload_limit() {
        let service = AttachmentServiceBuilder::new()
            .records(Arc::new(MemoryRecordStore::new()))
            .blobs(Arc::new(ChunkedBlobStore::new()))
            .max_upload_bytes(1024)
            .build()
            .unwrap();
        assert_eq!(service.pipe().max_bytes(), Some(1024));

        let unlimited = AttachmentServiceBuilder::default()
            .records(Arc::new(MemoryRecordStore::new()))
            .blobs(Arc::new(ChunkedBlobStore::new()))
            .max_upload_bytes(0)
            .build()
            .unwrap();
        assert_eq!(unlimited.pipe().max_bytes(), None);
    }
}
