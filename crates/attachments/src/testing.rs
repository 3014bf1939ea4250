use std::collections::HashSet;

use bytes::Bytes;
use futures::future::join_all;

use coffer_blob::{BlobStore, collect, from_bytes};
use coffer_core::{BlobId, RecordFields};

use crate::error::AttachmentError;
use crate::service::AttachmentService;
use crate::types::{DeleteReceipt, Upload};

/// Run the attachment scenarios against a service and the blob store it
/// writes to.
///
/// The scenarios only inspect blobs they created, so the stores may be shared
/// with other tests. Backends should use a small part size so uploads span
/// several parts.
///
/// # Errors
///
/// Returns an error if any service operation fails unexpectedly.
pub async fn run_attachment_service_scenarios(
    service: &AttachmentService,
    blobs: &dyn BlobStore,
) -> Result<(), AttachmentError> {
    attach_then_fetch_returns_same_bytes(service, blobs).await?;
    replace_deletes_first_blob(service, blobs).await?;
    detach_is_idempotent(service, blobs).await?;
    delete_record_removes_record_and_blob(service, blobs).await?;
    Ok(())
}

/// Race `writers` attaches to one record.
///
/// Every attach must succeed, each displaced blob must be handed back by
/// exactly one of them, and only the blob the record ends up referencing may
/// survive.
///
/// # Errors
///
/// Returns an error if any service operation fails unexpectedly.
pub async fn run_concurrent_attach_scenario(
    service: &AttachmentService,
    blobs: &dyn BlobStore,
    writers: usize,
) -> Result<(), AttachmentError> {
    let id = new_record(service, "race.bin").await?;

    let attaches = (0..writers).map(|n| {
        let data = Bytes::from(vec![u8::try_from(n % 251).unwrap_or(0); 6000]);
        service.attach(&id, upload(format!("race-{n}.bin"), data))
    });
    let receipts = join_all(attaches)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let record = service.record(&id).await?;
    let current = record
        .attachment_blob()
        .cloned()
        .expect("record should reference one of the uploads");
    let written: HashSet<&BlobId> = receipts.iter().map(|r| &r.blob_id).collect();
    assert_eq!(written.len(), writers, "every attach should write its own blob");
    assert!(written.contains(&current));

    let mut replaced: Vec<&BlobId> = receipts
        .iter()
        .filter_map(|r| r.replaced.as_ref())
        .collect();
    replaced.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    let mut expected: Vec<&BlobId> = written.iter().copied().filter(|b| **b != current).collect();
    expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(replaced, expected, "each displaced blob is reported exactly once");

    for blob in &written {
        let exists = blobs.metadata(blob).await?.is_some();
        assert_eq!(exists, **blob == current, "only the referenced blob survives");
    }

    service.delete_record(&id).await?;
    Ok(())
}

fn upload(filename: impl Into<String>, data: impl Into<Bytes>) -> Option<Upload<'static>> {
    Some(Upload::new(filename, "application/octet-stream", from_bytes(data)))
}

/// Deterministic payload spanning several parts.
fn payload(seed: u8) -> Bytes {
    (0..10_000u32)
        .map(|i| u8::try_from(i % 251).unwrap_or(0) ^ seed)
        .collect()
}

async fn new_record(
    service: &AttachmentService,
    file_name: &str,
) -> Result<String, AttachmentError> {
    let record = service
        .create_record(RecordFields {
            file_name: Some(file_name.into()),
            ..RecordFields::default()
        })
        .await?;
    Ok(record.id.to_string())
}

async fn fetch_bytes(service: &AttachmentService, id: &str) -> Result<Bytes, AttachmentError> {
    let download = service.fetch(id).await?;
    collect(download.stream)
        .await
        .map_err(|e| AttachmentError::Transfer {
            offset: 0,
            message: e.to_string(),
        })
}

async fn attach_then_fetch_returns_same_bytes(
    service: &AttachmentService,
    blobs: &dyn BlobStore,
) -> Result<(), AttachmentError> {
    let id = new_record(service, "roundtrip.bin").await?;
    let data = payload(0x11);

    let receipt = service.attach(&id, upload("roundtrip.bin", data.clone())).await?;
    assert_eq!(receipt.size_bytes, 10_000);
    assert!(receipt.replaced.is_none(), "first attach replaces nothing");

    let download = service.fetch(&id).await?;
    assert_eq!(download.filename, "roundtrip.bin");
    assert_eq!(download.metadata.id, receipt.blob_id);
    assert_eq!(download.metadata.content_type, "application/octet-stream");
    let fetched = collect(download.stream).await.map_err(|e| AttachmentError::Transfer {
        offset: 0,
        message: e.to_string(),
    })?;
    assert_eq!(fetched, data, "fetched content should match the upload");

    let stored = blobs.metadata(&receipt.blob_id).await?.expect("blob should exist");
    assert_eq!(stored.size_bytes, 10_000);
    Ok(())
}

async fn replace_deletes_first_blob(
    service: &AttachmentService,
    blobs: &dyn BlobStore,
) -> Result<(), AttachmentError> {
    let id = new_record(service, "replace.bin").await?;

    let first = service.attach(&id, upload("v1.bin", payload(1))).await?;
    let second = service.attach(&id, upload("v2.bin", payload(2))).await?;

    assert_ne!(first.blob_id, second.blob_id);
    assert_eq!(second.replaced.as_ref(), Some(&first.blob_id));
    assert!(blobs.metadata(&first.blob_id).await?.is_none(), "replaced blob is deleted");
    assert!(blobs.metadata(&second.blob_id).await?.is_some());
    assert_eq!(fetch_bytes(service, &id).await?, payload(2));
    Ok(())
}

async fn detach_is_idempotent(
    service: &AttachmentService,
    blobs: &dyn BlobStore,
) -> Result<(), AttachmentError> {
    let id = new_record(service, "detach.bin").await?;
    let receipt = service.attach(&id, upload("detach.bin", payload(3))).await?;

    let first = service.detach(&id).await?;
    assert_eq!(first.deleted_count, 1);
    assert!(first.existed);
    assert!(blobs.metadata(&receipt.blob_id).await?.is_none(), "detached blob is deleted");
    assert!(service.record(&id).await?.attachment.is_none());

    let second = service.detach(&id).await?;
    assert_eq!(second, DeleteReceipt::nothing(), "second detach finds nothing");
    assert!(matches!(
        service.fetch(&id).await,
        Err(AttachmentError::NoAttachment(_))
    ));
    Ok(())
}

async fn delete_record_removes_record_and_blob(
    service: &AttachmentService,
    blobs: &dyn BlobStore,
) -> Result<(), AttachmentError> {
    let id = new_record(service, "delete.bin").await?;
    let receipt = service.attach(&id, upload("delete.bin", payload(4))).await?;

    let deleted = service.delete_record(&id).await?;
    assert_eq!(deleted.deleted_count, 1);
    assert!(deleted.existed);
    assert!(blobs.metadata(&receipt.blob_id).await?.is_none(), "attachment is deleted");
    assert!(matches!(
        service.record(&id).await,
        Err(AttachmentError::RecordNotFound(_))
    ));

    let again = service.delete_record(&id).await?;
    assert_eq!(again, DeleteReceipt::nothing());
    Ok(())
}
