use std::fmt;

use chrono::{DateTime, Utc};

use coffer_blob::{BlobMetadata, ByteStream};
use coffer_core::{BlobId, RecordId};

/// An attachment upload: the file's name and type plus its content.
pub struct Upload<'a> {
    /// Filename supplied by the client.
    pub filename: String,
    /// MIME content type supplied by the client.
    pub content_type: String,
    /// Content, pulled chunk by chunk as the blob store consumes it.
    pub stream: ByteStream<'a>,
}

impl<'a> Upload<'a> {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        stream: ByteStream<'a>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            stream,
        }
    }
}

impl fmt::Debug for Upload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Result of a successful attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachReceipt {
    pub record_id: RecordId,
    /// The newly stored blob now referenced by the record.
    pub blob_id: BlobId,
    pub filename: String,
    pub size_bytes: u64,
    pub attached_at: DateTime<Utc>,
    /// The blob this attach displaced, if the record already had one.
    pub replaced: Option<BlobId>,
}

/// An attachment ready to be streamed to a consumer.
pub struct Download {
    pub record_id: RecordId,
    /// Filename recorded when the attachment was uploaded.
    pub filename: String,
    pub metadata: BlobMetadata,
    /// Content, read lazily from the blob store.
    pub stream: ByteStream<'static>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("record_id", &self.record_id)
            .field("filename", &self.filename)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Result of a detach or record delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteReceipt {
    /// Number of records modified (detach) or removed (delete): 0 or 1.
    pub deleted_count: u64,
    /// Whether the target (attachment or record) existed when the call began.
    pub existed: bool,
}

impl DeleteReceipt {
    /// Receipt for a call that found nothing to remove.
    #[must_use]
    pub fn nothing() -> Self {
        Self::default()
    }
}

/// Outcome of an orphan sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Blobs past the grace period that were examined.
    pub scanned: usize,
    /// Unreferenced blobs past the grace period that were deleted.
    pub deleted: usize,
    /// Deletions that failed and will be retried by the next sweep.
    pub failed: usize,
    /// Stale writes that never completed and were removed.
    pub incomplete: u64,
}
