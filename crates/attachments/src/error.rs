use thiserror::Error;

use coffer_blob::BlobError;
use coffer_core::{BlobId, InvalidRecordId, RecordId};
use coffer_record::RecordError;

/// Errors returned by the attachment service.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// The record identifier is not a canonical record id.
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidRecordId),

    /// An attach request carried no file.
    #[error("no file was provided")]
    MissingPayload,

    /// No record exists with the given id.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// The record exists but has no attachment.
    #[error("record {0} has no attachment")]
    NoAttachment(RecordId),

    /// The record references a blob that does not exist.
    #[error("record {record} references missing blob {blob}")]
    DanglingReference { record: RecordId, blob: BlobId },

    /// A byte stream failed part way through a transfer.
    #[error("transfer failed after {offset} bytes: {message}")]
    Transfer { offset: u64, message: String },

    /// The uploaded content exceeded the configured size limit.
    #[error("payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    /// The service was misconfigured (e.g. missing a store).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An error occurred in the record store.
    #[error("record store error: {0}")]
    Record(#[from] RecordError),

    /// An error occurred in the blob store.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
}

impl AttachmentError {
    /// Stable `snake_case` name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::MissingPayload => "missing_payload",
            Self::RecordNotFound(_) => "record_not_found",
            Self::NoAttachment(_) => "no_attachment",
            Self::DanglingReference { .. } => "dangling_reference",
            Self::Transfer { .. } => "transfer_error",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Configuration(_) => "configuration",
            Self::Record(_) => "record_store",
            Self::Blob(_) => "blob_store",
        }
    }
}
