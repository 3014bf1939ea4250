use async_trait::async_trait;

use coffer_core::{AttachmentRef, BlobId, Record, RecordFields, RecordId};

use crate::error::RecordError;

/// Outcome of [`RecordStore::set_attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentUpdate {
    /// No record with the given id exists. Nothing was written.
    NotFound,
    /// The reference was written, atomically replacing `previous`.
    Applied {
        previous: Option<AttachmentRef>,
    },
}

impl AttachmentUpdate {
    /// Number of records matched by the update (0 or 1).
    #[must_use]
    pub fn matched_count(&self) -> u64 {
        match self {
            Self::NotFound => 0,
            Self::Applied { .. } => 1,
        }
    }
}

/// Trait for persisting job records and their attachment references.
///
/// Every method touches a single record atomically. No operation spans the
/// record store and a blob store. Implementations must be `Send + Sync` and
/// safe for concurrent access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record, assigning its id and creation time.
    ///
    /// A random IV is generated when `fields.request_iv` is absent.
    async fn create(&self, fields: RecordFields) -> Result<Record, RecordError>;

    /// Get a record by id. Returns `None` if not found.
    async fn get(&self, id: &RecordId) -> Result<Option<Record>, RecordError>;

    /// Get the records for `ids` that exist, in the order requested.
    async fn get_many(&self, ids: &[RecordId]) -> Result<Vec<Record>, RecordError>;

    /// Most recently created records, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Record>, RecordError>;

    /// Replace the IV of a record. Returns the matched count.
    async fn update_iv(&self, id: &RecordId, iv: &str) -> Result<u64, RecordError>;

    /// Atomically set the attachment reference, returning the one it replaced.
    async fn set_attachment(
        &self,
        id: &RecordId,
        attachment: AttachmentRef,
    ) -> Result<AttachmentUpdate, RecordError>;

    /// Clear the attachment reference. Returns the matched count.
    ///
    /// With `expected` set, the clear only applies while the record still
    /// references that blob, so a reference written concurrently survives.
    async fn clear_attachment(
        &self,
        id: &RecordId,
        expected: Option<&BlobId>,
    ) -> Result<u64, RecordError>;

    /// Delete a record, returning the removed row.
    async fn delete(&self, id: &RecordId) -> Result<Option<Record>, RecordError>;

    /// The subset of `candidates` referenced by some record.
    async fn referenced_blobs(&self, candidates: &[BlobId]) -> Result<Vec<BlobId>, RecordError>;
}
