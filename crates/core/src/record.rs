use chrono::{DateTime, SubsecRound, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::types::{BlobId, RecordId};

/// Current time truncated to microseconds, the precision every store persists.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Length in bytes of a generated initialization vector.
pub const IV_LEN: usize = 16;

/// Job metadata carried by a record.
///
/// These fields are opaque to the attachment layer and passed through
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RecordFields {
    /// Hex-encoded initialization vector of the cipher run.
    #[serde(default)]
    pub request_iv: Option<String>,
    /// Block cipher mode (e.g. `"CBC"`).
    #[serde(default)]
    pub mode: Option<String>,
    /// AES key length (e.g. `"256"`).
    #[serde(default)]
    pub aes_length: Option<String>,
    /// Password submitted with the request.
    #[serde(default)]
    pub request_password: Option<String>,
    /// Name of the file submitted for processing.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Requested operation (`"encrypt"` / `"decrypt"`).
    #[serde(default)]
    pub operation: Option<String>,
}

impl RecordFields {
    /// Fill in a random IV when none was supplied.
    #[must_use]
    pub fn with_generated_iv(mut self) -> Self {
        if self.request_iv.is_none() {
            self.request_iv = Some(generate_iv());
        }
        self
    }
}

/// Generate a random hex-encoded IV of [`IV_LEN`] bytes.
#[must_use]
pub fn generate_iv() -> String {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    hex::encode(iv)
}

/// Reference from a record to the blob it owns.
///
/// The three fields are always written and cleared together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AttachmentRef {
    /// Blob holding the attachment content.
    pub blob_id: BlobId,
    /// Filename supplied when the attachment was uploaded.
    pub name: String,
    /// When the attachment was committed to the record.
    pub attached_at: DateTime<Utc>,
}

impl AttachmentRef {
    /// Create a reference stamped with the current time.
    #[must_use]
    pub fn now(blob_id: BlobId, name: impl Into<String>) -> Self {
        Self {
            blob_id,
            name: name.into(),
            attached_at: now(),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Record {
    /// Store-assigned identifier.
    pub id: RecordId,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: RecordFields,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// The owned attachment, if any.
    #[serde(default)]
    pub attachment: Option<AttachmentRef>,
}

impl Record {
    /// Build a new record with a fresh id, the current timestamp and no attachment.
    #[must_use]
    pub fn new(fields: RecordFields) -> Self {
        Self {
            id: RecordId::generate(),
            fields,
            created_at: now(),
            attachment: None,
        }
    }

    /// Blob id of the current attachment.
    #[must_use]
    pub fn attachment_blob(&self) -> Option<&BlobId> {
        self.attachment.as_ref().map(|a| &a.blob_id)
    }
}
