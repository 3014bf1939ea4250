use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use coffer_attachments::{AttachReceipt, DeleteReceipt};
use coffer_core::{BlobId, RecordId};

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status indicator.
    #[schema(example = "ok")]
    pub status: String,
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    #[schema(example = "record not found: 0192f1c4-7e3a-7c1b-9a2e-3f4b5c6d7e8f")]
    pub error: String,
    /// Stable error kind.
    #[schema(example = "record_not_found")]
    pub kind: String,
}

/// One entry of a record lookup request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordLookup {
    /// Record identifier.
    #[schema(example = "0192f1c4-7e3a-7c1b-9a2e-3f4b5c6d7e8f")]
    pub code: String,
}

/// Request body for replacing a record's IV.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateIvRequest {
    /// New hex-encoded initialization vector.
    #[schema(example = "00112233445566778899aabbccddeeff")]
    pub request_iv: String,
}

/// Multipart form accepted by the upload endpoint.
#[derive(Debug, ToSchema)]
pub struct UploadForm {
    /// File content. The part's filename and content type are stored with it.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Result of a successful upload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachmentResponse {
    /// Record the attachment belongs to.
    pub record_id: RecordId,
    /// Blob holding the content.
    pub blob_id: BlobId,
    /// Stored filename.
    pub filename: String,
    /// Content length in bytes.
    pub size_bytes: u64,
    /// When the attachment was committed.
    pub attached_at: DateTime<Utc>,
    /// Blob displaced by this upload, if any.
    pub replaced: Option<BlobId>,
}

impl From<AttachReceipt> for AttachmentResponse {
    fn from(receipt: AttachReceipt) -> Self {
        Self {
            record_id: receipt.record_id,
            blob_id: receipt.blob_id,
            filename: receipt.filename,
            size_bytes: receipt.size_bytes,
            attached_at: receipt.attached_at,
            replaced: receipt.replaced,
        }
    }
}

/// Result of a delete operation.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    /// Number of entities removed.
    #[schema(example = 1)]
    pub deleted_count: u64,
}

impl From<DeleteReceipt> for DeleteResponse {
    fn from(receipt: DeleteReceipt) -> Self {
        Self {
            deleted_count: receipt.deleted_count,
        }
    }
}
