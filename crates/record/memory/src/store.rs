use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use coffer_core::{AttachmentRef, BlobId, Record, RecordFields, RecordId};
use coffer_record::error::RecordError;
use coffer_record::store::{AttachmentUpdate, RecordStore};

/// In-memory [`RecordStore`] backed by a [`DashMap`].
///
/// Each operation holds the shard lock of a single record for its whole
/// read-modify-write, which makes attachment swaps atomic per record.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<RecordId, Record>,
}

impl MemoryRecordStore {
    /// Create a new, empty in-memory record store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, fields: RecordFields) -> Result<Record, RecordError> {
        let record = Record::new(fields.with_generated_iv());
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>, RecordError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn get_many(&self, ids: &[RecordId]) -> Result<Vec<Record>, RecordError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Record>, RecordError> {
        let mut all: Vec<Record> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        all.truncate(limit);
        Ok(all)
    }

    async fn update_iv(&self, id: &RecordId, iv: &str) -> Result<u64, RecordError> {
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.fields.request_iv = Some(iv.to_owned());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn set_attachment(
        &self,
        id: &RecordId,
        attachment: AttachmentRef,
    ) -> Result<AttachmentUpdate, RecordError> {
        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(AttachmentUpdate::NotFound);
        };
        let previous = record.attachment.replace(attachment);
        Ok(AttachmentUpdate::Applied { previous })
    }

    async fn clear_attachment(
        &self,
        id: &RecordId,
        expected: Option<&BlobId>,
    ) -> Result<u64, RecordError> {
        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(0);
        };
        if let Some(expected) = expected
            && record.attachment_blob() != Some(expected)
        {
            return Ok(0);
        }
        record.attachment = None;
        Ok(1)
    }

    async fn delete(&self, id: &RecordId) -> Result<Option<Record>, RecordError> {
        Ok(self.records.remove(id).map(|(_, record)| record))
    }

    async fn referenced_blobs(&self, candidates: &[BlobId]) -> Result<Vec<BlobId>, RecordError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&BlobId> = candidates.iter().collect();
        Ok(self
            .records
            .iter()
            .filter_map(|r| r.attachment_blob().filter(|b| wanted.contains(b)).cloned())
            .collect())
    }
}
