use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use coffer_blob::{BlobError, BlobMetadata, BlobStore};
use coffer_core::{AttachmentRef, BlobId, Record, RecordFields, RecordId};
use coffer_record::{AttachmentUpdate, RecordStore};

use crate::error::AttachmentError;
use crate::pipe::{LimitExceeded, TransferPipe};
use crate::types::{AttachReceipt, DeleteReceipt, Download, SweepReport, Upload};

/// Blobs examined per page by [`AttachmentService::sweep_orphans`].
pub const SWEEP_PAGE_SIZE: usize = 256;

/// Keeps records and their attachment blobs consistent.
///
/// There is no transaction across the two stores. Every operation orders its
/// steps so that an interrupted call can simply be repeated, and anything
/// left behind is an unreferenced blob for
/// [`sweep_orphans`](Self::sweep_orphans) to collect.
pub struct AttachmentService {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    pipe: TransferPipe,
}

impl AttachmentService {
    /// Create a service over the given stores with no upload limit.
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self::with_pipe(records, blobs, TransferPipe::default())
    }

    pub(crate) fn with_pipe(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        pipe: TransferPipe,
    ) -> Self {
        Self {
            records,
            blobs,
            pipe,
        }
    }

    /// The transfer pipe used for uploads and downloads.
    pub fn pipe(&self) -> &TransferPipe {
        &self.pipe
    }

    /// Store `upload` as the attachment of `record_id`, replacing any
    /// previous one.
    ///
    /// The blob is written first; the record is only updated once the
    /// content is durable. The displaced blob, if any, is deleted after the
    /// new reference has committed.
    ///
    /// # Errors
    ///
    /// Fails with [`AttachmentError::InvalidIdentifier`],
    /// [`AttachmentError::MissingPayload`], [`AttachmentError::RecordNotFound`],
    /// [`AttachmentError::Transfer`] or [`AttachmentError::PayloadTooLarge`],
    /// or with a storage error.
    pub async fn attach(
        &self,
        record_id: &str,
        upload: Option<Upload<'_>>,
    ) -> Result<AttachReceipt, AttachmentError> {
        let id = RecordId::parse(record_id)?;
        let Some(upload) = upload else {
            return Err(AttachmentError::MissingPayload);
        };

        let source = self.pipe.inbound(upload.stream);
        let blob = self
            .blobs
            .write(&upload.filename, &upload.content_type, source)
            .await
            .map_err(|e| Self::upload_error(id, e))?;

        let attachment = AttachmentRef::now(blob.id.clone(), upload.filename);
        let attached_at = attachment.attached_at;
        let update = match self.records.set_attachment(&id, attachment).await {
            Ok(update) => update,
            Err(e) => {
                self.discard_blob(id, &blob.id, "record update failed").await;
                return Err(e.into());
            }
        };

        let previous = match update {
            AttachmentUpdate::NotFound => {
                self.discard_blob(id, &blob.id, "record not found").await;
                return Err(AttachmentError::RecordNotFound(id));
            }
            AttachmentUpdate::Applied { previous } => previous,
        };

        let replaced = previous.map(|p| p.blob_id).filter(|old| *old != blob.id);
        if let Some(old) = &replaced {
            self.discard_blob(id, old, "replaced").await;
        }

        info!(
            record_id = %id,
            blob_id = %blob.id,
            bytes = blob.size_bytes,
            replaced = replaced.as_ref().map(BlobId::as_str),
            "attachment stored"
        );
        Ok(AttachReceipt {
            record_id: id,
            blob_id: blob.id,
            filename: blob.filename,
            size_bytes: blob.size_bytes,
            attached_at,
            replaced,
        })
    }

    /// Open the attachment of `record_id` for streaming.
    ///
    /// # Errors
    ///
    /// Fails with [`AttachmentError::InvalidIdentifier`],
    /// [`AttachmentError::RecordNotFound`], [`AttachmentError::NoAttachment`]
    /// or [`AttachmentError::DanglingReference`], or with a storage error.
    /// Failures after streaming has begun surface as stream errors instead.
    pub async fn fetch(&self, record_id: &str) -> Result<Download, AttachmentError> {
        let id = RecordId::parse(record_id)?;
        let record = self
            .records
            .get(&id)
            .await?
            .ok_or(AttachmentError::RecordNotFound(id))?;
        let Some(attachment) = record.attachment else {
            return Err(AttachmentError::NoAttachment(id));
        };

        let Some(download) = self.blobs.read(&attachment.blob_id).await? else {
            error!(
                record_id = %id,
                blob_id = %attachment.blob_id,
                "record references a blob that does not exist"
            );
            return Err(AttachmentError::DanglingReference {
                record: id,
                blob: attachment.blob_id,
            });
        };

        debug!(
            record_id = %id,
            blob_id = %attachment.blob_id,
            bytes = download.metadata.size_bytes,
            "attachment download started"
        );
        let stream = self.pipe.outbound(id, &download.metadata, download.stream);
        Ok(Download {
            record_id: id,
            filename: attachment.name,
            metadata: download.metadata,
            stream,
        })
    }

    /// Remove the attachment of `record_id`. A record without one is left
    /// alone and reported with `deleted_count = 0`.
    ///
    /// # Errors
    ///
    /// Fails with [`AttachmentError::InvalidIdentifier`] or a record store
    /// error. Blob deletion failures are logged only.
    pub async fn detach(&self, record_id: &str) -> Result<DeleteReceipt, AttachmentError> {
        let id = RecordId::parse(record_id)?;
        let Some(record) = self.records.get(&id).await? else {
            return Ok(DeleteReceipt::nothing());
        };
        let Some(attachment) = record.attachment else {
            return Ok(DeleteReceipt::nothing());
        };

        self.discard_blob(id, &attachment.blob_id, "detached").await;
        // Conditional, so a reference committed concurrently is kept.
        let cleared = self
            .records
            .clear_attachment(&id, Some(&attachment.blob_id))
            .await?;

        info!(record_id = %id, blob_id = %attachment.blob_id, cleared, "attachment removed");
        Ok(DeleteReceipt {
            deleted_count: cleared,
            existed: true,
        })
    }

    /// Delete `record_id` together with its attachment. A missing record is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Fails with [`AttachmentError::InvalidIdentifier`] or a record store
    /// error. Blob deletion failures are logged only.
    pub async fn delete_record(&self, record_id: &str) -> Result<DeleteReceipt, AttachmentError> {
        let id = RecordId::parse(record_id)?;

        let mut discarded = None;
        if let Some(record) = self.records.get(&id).await?
            && let Some(blob_id) = record.attachment_blob()
        {
            self.discard_blob(id, blob_id, "record deleted").await;
            discarded = Some(blob_id.clone());
        }

        let Some(removed) = self.records.delete(&id).await? else {
            return Ok(DeleteReceipt::nothing());
        };
        // An attach may have committed between the lookup and the delete.
        if let Some(blob_id) = removed.attachment_blob()
            && discarded.as_ref() != Some(blob_id)
        {
            self.discard_blob(id, blob_id, "record deleted").await;
        }

        info!(record_id = %id, "record deleted");
        Ok(DeleteReceipt {
            deleted_count: 1,
            existed: true,
        })
    }

    /// Delete blobs older than `grace` that no record references.
    ///
    /// Blobs are walked oldest first in pages of [`SWEEP_PAGE_SIZE`], and
    /// references are looked up per page, so memory stays bounded however
    /// many blobs exist. The walk stops at the first blob inside the grace
    /// period, which covers uploads that are written but not yet
    /// referenced. Writes that started before the cutoff and never completed
    /// are purged as well.
    ///
    /// # Errors
    ///
    /// Fails if either store cannot be listed. Individual deletions that fail
    /// are counted in the report and retried by the next sweep.
    pub async fn sweep_orphans(&self, grace: Duration) -> Result<SweepReport, AttachmentError> {
        let mut report = SweepReport::default();
        let cutoff = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace));
        let Some(cutoff) = cutoff else {
            return Ok(report);
        };

        report.incomplete = self.blobs.purge_incomplete(cutoff).await?;

        let mut after: Option<BlobMetadata> = None;
        loop {
            let page = self.blobs.list_after(after.as_ref(), SWEEP_PAGE_SIZE).await?;
            // Oldest first: everything after the first young blob is young too.
            let young = page.iter().position(|blob| blob.created_at > cutoff);
            let old = &page[..young.unwrap_or(page.len())];

            let ids: Vec<BlobId> = old.iter().map(|blob| blob.id.clone()).collect();
            let referenced: HashSet<BlobId> =
                self.records.referenced_blobs(&ids).await?.into_iter().collect();
            report.scanned += old.len();

            for blob in old {
                if referenced.contains(&blob.id) {
                    continue;
                }
                match self.blobs.delete(&blob.id).await {
                    Ok(_) => {
                        report.deleted += 1;
                        debug!(blob_id = %blob.id, "orphan blob deleted");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(blob_id = %blob.id, error = %e, "failed to delete orphan blob");
                    }
                }
            }

            if young.is_some() || page.len() < SWEEP_PAGE_SIZE {
                break;
            }
            after = page.into_iter().last();
        }

        if report.deleted > 0 || report.failed > 0 || report.incomplete > 0 {
            info!(
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                incomplete = report.incomplete,
                "orphan sweep finished"
            );
        }
        Ok(report)
    }

    /// Create a record. A random IV is generated when none is supplied.
    ///
    /// # Errors
    ///
    /// Fails with a record store error.
    pub async fn create_record(&self, fields: RecordFields) -> Result<Record, AttachmentError> {
        let record = self.records.create(fields).await?;
        debug!(record_id = %record.id, "record created");
        Ok(record)
    }

    /// Look up a single record.
    ///
    /// # Errors
    ///
    /// Fails with [`AttachmentError::InvalidIdentifier`],
    /// [`AttachmentError::RecordNotFound`] or a record store error.
    pub async fn record(&self, record_id: &str) -> Result<Record, AttachmentError> {
        let id = RecordId::parse(record_id)?;
        self.records
            .get(&id)
            .await?
            .ok_or(AttachmentError::RecordNotFound(id))
    }

    /// Look up several records. Invalid and unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Fails with a record store error.
    pub async fn records_by_ids<S: AsRef<str>>(
        &self,
        record_ids: &[S],
    ) -> Result<Vec<Record>, AttachmentError> {
        let ids: Vec<RecordId> = record_ids
            .iter()
            .filter_map(|raw| RecordId::parse(raw.as_ref()).ok())
            .collect();
        Ok(self.records.get_many(&ids).await?)
    }

    /// The most recently created records, newest first.
    ///
    /// # Errors
    ///
    /// Fails with a record store error.
    pub async fn recent_records(&self, limit: usize) -> Result<Vec<Record>, AttachmentError> {
        Ok(self.records.list_recent(limit).await?)
    }

    /// Replace the IV of a record and return the updated record.
    ///
    /// # Errors
    ///
    /// Fails with [`AttachmentError::InvalidIdentifier`],
    /// [`AttachmentError::RecordNotFound`] or a record store error.
    pub async fn update_iv(&self, record_id: &str, iv: &str) -> Result<Record, AttachmentError> {
        let id = RecordId::parse(record_id)?;
        if self.records.update_iv(&id, iv).await? == 0 {
            return Err(AttachmentError::RecordNotFound(id));
        }
        self.records
            .get(&id)
            .await?
            .ok_or(AttachmentError::RecordNotFound(id))
    }

    /// Map a failed upload write onto the service error.
    fn upload_error(record: RecordId, err: BlobError) -> AttachmentError {
        match err {
            BlobError::Transfer { offset, source } => {
                let limit = source
                    .get_ref()
                    .and_then(|e| e.downcast_ref::<LimitExceeded>())
                    .map(|e| e.limit);
                if let Some(limit) = limit {
                    info!(record_id = %record, limit, "upload rejected: too large");
                    return AttachmentError::PayloadTooLarge { limit };
                }
                warn!(record_id = %record, offset, error = %source, "upload aborted");
                AttachmentError::Transfer {
                    offset,
                    message: source.to_string(),
                }
            }
            other => AttachmentError::Blob(other),
        }
    }

    /// Best-effort blob deletion used for compensation and cleanup.
    ///
    /// Failures are logged and otherwise ignored; the orphan sweep picks up
    /// whatever is left behind.
    async fn discard_blob(&self, record: RecordId, blob: &BlobId, reason: &'static str) {
        match self.blobs.delete(blob).await {
            Ok(true) => debug!(record_id = %record, blob_id = %blob, reason, "blob deleted"),
            Ok(false) => debug!(record_id = %record, blob_id = %blob, reason, "blob already gone"),
            Err(e) => warn!(
                record_id = %record,
                blob_id = %blob,
                reason,
                error = %e,
                "blob deletion failed, leaving it for the orphan sweep"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use coffer_blob::{BlobDownload, BlobMetadata, ByteStream, collect, from_bytes, from_chunks};
    use coffer_blob_chunked::{ChunkedBlobStore, ChunkedConfig};
    use coffer_record::RecordError;
    use coffer_record_memory::MemoryRecordStore;

    use super::*;

    /// Chunked store with switchable faults.
    #[derive(Default)]
    struct FaultyBlobStore {
        inner: ChunkedBlobStore,
        fail_deletes: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for FaultyBlobStore {
        async fn write(
            &self,
            filename: &str,
            content_type: &str,
            data: ByteStream<'_>,
        ) -> Result<BlobMetadata, BlobError> {
            self.inner.write(filename, content_type, data).await
        }

        async fn read(&self, id: &BlobId) -> Result<Option<BlobDownload>, BlobError> {
            self.inner.read(id).await
        }

        async fn metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>, BlobError> {
            self.inner.metadata(id).await
        }

        async fn delete(&self, id: &BlobId) -> Result<bool, BlobError> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(BlobError::Storage("delete refused".into()));
            }
            self.inner.delete(id).await
        }

        async fn list(&self, limit: Option<usize>) -> Result<Vec<BlobMetadata>, BlobError> {
            self.inner.list(limit).await
        }
    }

    /// Memory record store whose attachment swaps can be made to fail.
    #[derive(Default)]
    struct FaultyRecordStore {
        inner: MemoryRecordStore,
        fail_swaps: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for FaultyRecordStore {
        async fn create(&self, fields: RecordFields) -> Result<Record, RecordError> {
            self.inner.create(fields).await
        }

        async fn get(&self, id: &RecordId) -> Result<Option<Record>, RecordError> {
            self.inner.get(id).await
        }

        async fn get_many(&self, ids: &[RecordId]) -> Result<Vec<Record>, RecordError> {
            self.inner.get_many(ids).await
        }

        async fn list_recent(&self, limit: usize) -> Result<Vec<Record>, RecordError> {
            self.inner.list_recent(limit).await
        }

        async fn update_iv(&self, id: &RecordId, iv: &str) -> Result<u64, RecordError> {
            self.inner.update_iv(id, iv).await
        }

        async fn set_attachment(
            &self,
            id: &RecordId,
            attachment: AttachmentRef,
        ) -> Result<AttachmentUpdate, RecordError> {
            if self.fail_swaps.load(Ordering::SeqCst) {
                return Err(RecordError::Backend("swap refused".into()));
            }
            self.inner.set_attachment(id, attachment).await
        }

        async fn clear_attachment(
            &self,
            id: &RecordId,
            expected: Option<&BlobId>,
        ) -> Result<u64, RecordError> {
            self.inner.clear_attachment(id, expected).await
        }

        async fn delete(&self, id: &RecordId) -> Result<Option<Record>, RecordError> {
            self.inner.delete(id).await
        }

        async fn referenced_blobs(
            &self,
            candidates: &[BlobId],
        ) -> Result<Vec<BlobId>, RecordError> {
            self.inner.referenced_blobs(candidates).await
        }
    }

    struct Fixture {
        records: Arc<MemoryRecordStore>,
        blobs: Arc<FaultyBlobStore>,
        service: AttachmentService,
    }

    fn fixture_with_limit(max_bytes: Option<u64>) -> Fixture {
        let records = Arc::new(MemoryRecordStore::new());
        let blobs = Arc::new(FaultyBlobStore {
            inner: ChunkedBlobStore::with_config(ChunkedConfig { chunk_size: 1024 }),
            fail_deletes: AtomicBool::new(false),
        });
        let service = AttachmentService::with_pipe(
            Arc::clone(&records) as Arc<dyn RecordStore>,
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            TransferPipe::new(max_bytes),
        );
        Fixture {
            records,
            blobs,
            service,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_limit(None)
    }

    fn upload(name: &str, data: &'static [u8]) -> Option<Upload<'static>> {
        Some(Upload::new(name, "application/pdf", from_bytes(data)))
    }

    async fn new_record(f: &Fixture) -> String {
        f.service
            .create_record(RecordFields::default())
            .await
            .unwrap()
            .id
            .to_string()
    }

    async fn fetch_bytes(f: &Fixture, id: &str) -> Bytes {
        let download = f.service.fetch(id).await.unwrap();
        collect(download.stream).await.unwrap()
    }

    /// Attachment set iff its blob exists.
    async fn assert_consistent(f: &Fixture, id: &str) {
        let record = f.service.record(id).await.unwrap();
        if let Some(blob) = record.attachment_blob() {
            assert!(
                f.blobs.metadata(blob).await.unwrap().is_some(),
                "attachment references a missing blob"
            );
        }
    }

    #[tokio::test]
    async fn attach_then_fetch_returns_identical_content() {
        let f = fixture();
        let id = new_record(&f).await;

        let receipt = f
            .service
            .attach(&id, upload("report.pdf", b"%PDF-1.7 report"))
            .await
            .unwrap();
        assert_eq!(receipt.filename, "report.pdf");
        assert_eq!(receipt.size_bytes, 15);
        assert!(receipt.replaced.is_none());

        let download = f.service.fetch(&id).await.unwrap();
        assert_eq!(download.filename, "report.pdf");
        assert_eq!(download.metadata.content_type, "application/pdf");
        assert_eq!(download.metadata.id, receipt.blob_id);
        let data = collect(download.stream).await.unwrap();
        assert_eq!(&data[..], b"%PDF-1.7 report");
        assert_consistent(&f, &id).await;
    }

    #[tokio::test]
    async fn second_attach_replaces_and_deletes_first_blob() {
        let f = fixture();
        let id = new_record(&f).await;

        let first = f.service.attach(&id, upload("report.pdf", b"one")).await.unwrap();
        let second = f.service.attach(&id, upload("v2.pdf", b"two")).await.unwrap();

        assert_ne!(first.blob_id, second.blob_id);
        assert_eq!(second.replaced.as_ref(), Some(&first.blob_id));
        assert_eq!(&fetch_bytes(&f, &id).await[..], b"two");
        assert!(f.blobs.read(&first.blob_id).await.unwrap().is_none());
        assert_eq!(f.blobs.list(None).await.unwrap().len(), 1);
        assert_consistent(&f, &id).await;
    }

    #[tokio::test]
    async fn attach_to_unknown_record_compensates() {
        let f = fixture();
        let missing = RecordId::generate().to_string();

        let err = f.service.attach(&missing, upload("a.pdf", b"data")).await.unwrap_err();
        assert!(matches!(err, AttachmentError::RecordNotFound(_)));
        assert!(f.blobs.list(None).await.unwrap().is_empty(), "fresh blob discarded");
    }

    #[tokio::test]
    async fn failed_record_update_discards_fresh_blob() {
        let records = Arc::new(FaultyRecordStore::default());
        let blobs = Arc::new(ChunkedBlobStore::with_config(ChunkedConfig { chunk_size: 1024 }));
        let service = AttachmentService::new(
            Arc::clone(&records) as Arc<dyn RecordStore>,
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
        );
        let id = service
            .create_record(RecordFields::default())
            .await
            .unwrap()
            .id
            .to_string();

        records.fail_swaps.store(true, Ordering::SeqCst);
        let err = service.attach(&id, upload("a.pdf", b"data")).await.unwrap_err();
        assert!(matches!(err, AttachmentError::Record(RecordError::Backend(_))));
        assert!(blobs.list(None).await.unwrap().is_empty(), "fresh blob discarded");
        assert_eq!(blobs.chunk_count(), 0);

        // An existing attachment is left untouched.
        records.fail_swaps.store(false, Ordering::SeqCst);
        let kept = service.attach(&id, upload("keep.pdf", b"keep")).await.unwrap();
        records.fail_swaps.store(true, Ordering::SeqCst);
        service.attach(&id, upload("b.pdf", b"other")).await.unwrap_err();

        let listed = blobs.list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.blob_id);
        let record = service.record(&id).await.unwrap();
        assert_eq!(record.attachment_blob(), Some(&kept.blob_id));
    }

    #[tokio::test]
    async fn attach_validates_before_touching_storage() {
        let f = fixture();

        let err = f.service.attach("not-an-id", upload("a.pdf", b"x")).await.unwrap_err();
        assert!(matches!(err, AttachmentError::InvalidIdentifier(_)));

        let id = new_record(&f).await;
        let err = f.service.attach(&id, None).await.unwrap_err();
        assert!(matches!(err, AttachmentError::MissingPayload));

        assert!(f.blobs.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_leaves_record_unmodified() {
        let f = fixture();
        let id = new_record(&f).await;
        let original = f.service.attach(&id, upload("keep.pdf", b"keep")).await.unwrap();

        let broken = from_chunks(vec![
            Ok(Bytes::from(vec![1u8; 3000])),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = f
            .service
            .attach(&id, Some(Upload::new("new.pdf", "application/pdf", broken)))
            .await
            .unwrap_err();
        match err {
            AttachmentError::Transfer { offset, .. } => assert_eq!(offset, 3000),
            other => panic!("expected Transfer, got {other:?}"),
        }

        let record = f.service.record(&id).await.unwrap();
        assert_eq!(record.attachment_blob(), Some(&original.blob_id));
        assert_eq!(&fetch_bytes(&f, &id).await[..], b"keep");
        assert_eq!(f.blobs.list(None).await.unwrap().len(), 1);
        assert_eq!(f.blobs.inner.chunk_count(), 1, "partial chunks discarded");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let f = fixture_with_limit(Some(2048));
        let id = new_record(&f).await;

        let big = from_chunks(vec![
            Ok(Bytes::from(vec![0u8; 1500])),
            Ok(Bytes::from(vec![0u8; 1500])),
        ]);
        let err = f
            .service
            .attach(&id, Some(Upload::new("big.bin", "application/octet-stream", big)))
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::PayloadTooLarge { limit: 2048 }));
        assert_eq!(err.kind(), "payload_too_large");

        assert!(f.service.record(&id).await.unwrap().attachment.is_none());
        assert!(f.blobs.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_error_kinds() {
        let f = fixture();

        let missing = RecordId::generate().to_string();
        let err = f.service.fetch(&missing).await.unwrap_err();
        assert!(matches!(err, AttachmentError::RecordNotFound(_)));

        let id = new_record(&f).await;
        let err = f.service.fetch(&id).await.unwrap_err();
        assert!(matches!(err, AttachmentError::NoAttachment(_)));

        let err = f.service.fetch("{not-canonical}").await.unwrap_err();
        assert!(matches!(err, AttachmentError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn fetch_reports_dangling_reference() {
        let f = fixture();
        let id = new_record(&f).await;
        let receipt = f.service.attach(&id, upload("a.pdf", b"data")).await.unwrap();

        f.blobs.inner.delete(&receipt.blob_id).await.unwrap();

        let err = f.service.fetch(&id).await.unwrap_err();
        match err {
            AttachmentError::DanglingReference { blob, .. } => assert_eq!(blob, receipt.blob_id),
            other => panic!("expected DanglingReference, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let f = fixture();
        let id = new_record(&f).await;
        let receipt = f.service.attach(&id, upload("a.pdf", b"data")).await.unwrap();

        let first = f.service.detach(&id).await.unwrap();
        assert_eq!(first.deleted_count, 1);
        assert!(first.existed);
        assert!(f.blobs.read(&receipt.blob_id).await.unwrap().is_none());
        assert!(f.service.record(&id).await.unwrap().attachment.is_none());

        let second = f.service.detach(&id).await.unwrap();
        assert_eq!(second, DeleteReceipt::nothing());

        let unknown = f.service.detach(&RecordId::generate().to_string()).await.unwrap();
        assert_eq!(unknown.deleted_count, 0);

        let err = f.service.detach("bogus").await.unwrap_err();
        assert!(matches!(err, AttachmentError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn detach_tolerates_blob_delete_failure() {
        let f = fixture();
        let id = new_record(&f).await;
        f.service.attach(&id, upload("a.pdf", b"data")).await.unwrap();

        f.blobs.fail_deletes.store(true, Ordering::SeqCst);
        let receipt = f.service.detach(&id).await.unwrap();
        assert_eq!(receipt.deleted_count, 1);
        assert!(f.service.record(&id).await.unwrap().attachment.is_none());
        // The blob survives as an orphan.
        assert_eq!(f.blobs.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_record_removes_record_and_blob() {
        let f = fixture();
        let id = new_record(&f).await;
        let receipt = f.service.attach(&id, upload("a.pdf", b"data")).await.unwrap();

        let deleted = f.service.delete_record(&id).await.unwrap();
        assert_eq!(deleted.deleted_count, 1);
        assert!(deleted.existed);
        assert!(f.blobs.read(&receipt.blob_id).await.unwrap().is_none());
        assert!(f.records.is_empty());

        let err = f.service.fetch(&id).await.unwrap_err();
        assert!(matches!(err, AttachmentError::RecordNotFound(_)));

        let again = f.service.delete_record(&id).await.unwrap();
        assert_eq!(again.deleted_count, 0);
        assert!(!again.existed);
    }

    #[tokio::test]
    async fn delete_record_survives_blob_delete_failure() {
        let f = fixture();
        let id = new_record(&f).await;
        let receipt = f.service.attach(&id, upload("a.pdf", b"data")).await.unwrap();

        f.blobs.fail_deletes.store(true, Ordering::SeqCst);
        let deleted = f.service.delete_record(&id).await.unwrap();
        assert_eq!(deleted.deleted_count, 1);
        assert!(deleted.existed);
        assert!(f.records.is_empty(), "record is deleted regardless");

        // The blob is left as an orphan for the sweep.
        assert!(f.blobs.read(&receipt.blob_id).await.unwrap().is_some());
        f.blobs.fail_deletes.store(false, Ordering::SeqCst);
        let report = f.service.sweep_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(f.blobs.read(&receipt.blob_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_scenario() {
        let f = fixture();
        let id = new_record(&f).await;

        let b1 = f.service.attach(&id, upload("report.pdf", b"version one")).await.unwrap();
        let download = f.service.fetch(&id).await.unwrap();
        assert_eq!(download.filename, "report.pdf");
        assert_eq!(&collect(download.stream).await.unwrap()[..], b"version one");

        let b2 = f.service.attach(&id, upload("v2.pdf", b"version two")).await.unwrap();
        assert_ne!(b1.blob_id, b2.blob_id);
        let download = f.service.fetch(&id).await.unwrap();
        assert_eq!(download.filename, "v2.pdf");
        assert_eq!(&collect(download.stream).await.unwrap()[..], b"version two");
        assert!(f.blobs.read(&b1.blob_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_attaches_leave_exactly_one_blob() {
        let f = Arc::new(fixture());
        let id = new_record(&f).await;

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let f = Arc::clone(&f);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let data = Bytes::from(vec![i; 4096]);
                f.service
                    .attach(&id, Some(Upload::new(format!("f{i}"), "text/plain", from_bytes(data))))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let blobs = f.blobs.list(None).await.unwrap();
        assert_eq!(blobs.len(), 1, "every displaced blob is deleted");
        let record = f.service.record(&id).await.unwrap();
        assert_eq!(record.attachment_blob(), Some(&blobs[0].id));
    }

    #[tokio::test]
    async fn sweep_removes_only_old_unreferenced_blobs() {
        let f = fixture();
        let id = new_record(&f).await;
        f.service.attach(&id, upload("kept.pdf", b"kept")).await.unwrap();
        f.blobs
            .write("orphan.bin", "text/plain", from_bytes("orphan"))
            .await
            .unwrap();

        // Young orphans are protected by the grace period.
        let report = f.service.sweep_orphans(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(report, SweepReport::default());

        let report = f.service.sweep_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(f.blobs.list(None).await.unwrap().len(), 1);
        assert_consistent(&f, &id).await;
    }

    #[tokio::test]
    async fn sweep_walks_every_page() {
        let f = fixture();
        let id = new_record(&f).await;
        let kept = f.service.attach(&id, upload("kept.pdf", b"kept")).await.unwrap();
        let orphans = SWEEP_PAGE_SIZE + 5;
        for n in 0..orphans {
            f.blobs
                .write(&format!("o{n}.bin"), "text/plain", from_bytes("o"))
                .await
                .unwrap();
        }

        let report = f.service.sweep_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(report.scanned, orphans + 1);
        assert_eq!(report.deleted, orphans);

        let left = f.blobs.list(None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, kept.blob_id);
    }

    #[tokio::test]
    async fn sweep_counts_failed_deletions() {
        let f = fixture();
        f.blobs.write("o.bin", "text/plain", from_bytes("o")).await.unwrap();
        f.blobs.fail_deletes.store(true, Ordering::SeqCst);

        let report = f.service.sweep_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn record_passthrough() {
        let f = fixture();
        let record = f
            .service
            .create_record(RecordFields {
                file_name: Some("in.txt".into()),
                ..RecordFields::default()
            })
            .await
            .unwrap();
        assert!(record.fields.request_iv.is_some());
        let id = record.id.to_string();
        let unknown = RecordId::generate().to_string();

        let found = f
            .service
            .records_by_ids(&[id.as_str(), "garbage", unknown.as_str()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let updated = f.service.update_iv(&id, "beef").await.unwrap();
        assert_eq!(updated.fields.request_iv.as_deref(), Some("beef"));

        let err = f
            .service
            .update_iv(&RecordId::generate().to_string(), "beef")
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::RecordNotFound(_)));

        assert_eq!(f.service.recent_records(10).await.unwrap().len(), 1);
    }
}
