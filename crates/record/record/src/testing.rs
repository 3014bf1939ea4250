use coffer_core::{AttachmentRef, BlobId, RecordFields, RecordId};

use crate::error::RecordError;
use crate::store::{AttachmentUpdate, RecordStore};

fn fields(file_name: &str) -> RecordFields {
    RecordFields {
        mode: Some("CBC".into()),
        aes_length: Some("256".into()),
        file_name: Some(file_name.into()),
        operation: Some("encrypt".into()),
        ..RecordFields::default()
    }
}

fn blob_ref(blob_id: &str) -> AttachmentRef {
    AttachmentRef::now(BlobId::new(blob_id), format!("{blob_id}.bin"))
}

/// Run the full record store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any storage operation fails unexpectedly.
pub async fn run_record_store_conformance_tests(
    store: &dyn RecordStore,
) -> Result<(), RecordError> {
    test_get_missing(store).await?;
    test_create_and_get(store).await?;
    test_create_generates_iv(store).await?;
    test_get_many(store).await?;
    test_list_recent(store).await?;
    test_update_iv(store).await?;
    test_set_attachment(store).await?;
    test_set_attachment_missing(store).await?;
    test_clear_attachment(store).await?;
    test_clear_attachment_conditional(store).await?;
    test_delete(store).await?;
    test_referenced_blobs(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn RecordStore) -> Result<(), RecordError> {
    let id = RecordId::generate();
    assert!(store.get(&id).await?.is_none(), "get on missing record should return None");
    Ok(())
}

async fn test_create_and_get(store: &dyn RecordStore) -> Result<(), RecordError> {
    let created = store.create(fields("plain.txt")).await?;
    assert!(created.attachment.is_none(), "new record has no attachment");
    assert_eq!(created.fields.file_name.as_deref(), Some("plain.txt"));

    let fetched = store.get(&created.id).await?.expect("record should exist");
    assert_eq!(fetched, created);
    Ok(())
}

async fn test_create_generates_iv(store: &dyn RecordStore) -> Result<(), RecordError> {
    let generated = store.create(fields("a")).await?;
    let iv = generated.fields.request_iv.expect("iv should be generated");
    assert_eq!(iv.len(), coffer_core::IV_LEN * 2);

    let supplied = store
        .create(RecordFields {
            request_iv: Some("00112233".into()),
            ..fields("b")
        })
        .await?;
    assert_eq!(supplied.fields.request_iv.as_deref(), Some("00112233"));
    Ok(())
}

async fn test_get_many(store: &dyn RecordStore) -> Result<(), RecordError> {
    let a = store.create(fields("many-a")).await?;
    let b = store.create(fields("many-b")).await?;
    let unknown = RecordId::generate();

    let found = store.get_many(&[b.id, unknown, a.id]).await?;
    let ids: Vec<RecordId> = found.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![b.id, a.id], "unknown ids skipped, order kept");

    assert!(store.get_many(&[]).await?.is_empty());
    Ok(())
}

async fn test_list_recent(store: &dyn RecordStore) -> Result<(), RecordError> {
    let latest = store.create(fields("recent")).await?;

    let all = store.list_recent(1_000).await?;
    assert!(all.iter().any(|r| r.id == latest.id), "list should include new record");
    assert!(
        all.windows(2).all(|w| w[0].created_at >= w[1].created_at),
        "list should be ordered newest first"
    );

    let limited = store.list_recent(1).await?;
    assert_eq!(limited.len(), 1);
    Ok(())
}

async fn test_update_iv(store: &dyn RecordStore) -> Result<(), RecordError> {
    let record = store.create(fields("iv")).await?;
    let matched = store.update_iv(&record.id, "cafebabe").await?;
    assert_eq!(matched, 1);
    let fetched = store.get(&record.id).await?.expect("record should exist");
    assert_eq!(fetched.fields.request_iv.as_deref(), Some("cafebabe"));
    assert_eq!(fetched.fields.file_name, record.fields.file_name, "other fields untouched");

    let matched = store.update_iv(&RecordId::generate(), "cafebabe").await?;
    assert_eq!(matched, 0, "update on missing record should match nothing");
    Ok(())
}

async fn test_set_attachment(store: &dyn RecordStore) -> Result<(), RecordError> {
    let record = store.create(fields("attach")).await?;

    let first = blob_ref("set-b1");
    let update = store.set_attachment(&record.id, first.clone()).await?;
    assert_eq!(update, AttachmentUpdate::Applied { previous: None });

    let fetched = store.get(&record.id).await?.expect("record should exist");
    assert_eq!(fetched.attachment.as_ref(), Some(&first));

    let second = blob_ref("set-b2");
    let update = store.set_attachment(&record.id, second.clone()).await?;
    assert_eq!(
        update,
        AttachmentUpdate::Applied {
            previous: Some(first)
        },
        "replacement should hand back the displaced reference"
    );
    let fetched = store.get(&record.id).await?.expect("record should exist");
    assert_eq!(fetched.attachment, Some(second));
    Ok(())
}

async fn test_set_attachment_missing(store: &dyn RecordStore) -> Result<(), RecordError> {
    let update = store
        .set_attachment(&RecordId::generate(), blob_ref("nobody"))
        .await?;
    assert_eq!(update, AttachmentUpdate::NotFound);
    Ok(())
}

async fn test_clear_attachment(store: &dyn RecordStore) -> Result<(), RecordError> {
    let record = store.create(fields("clear")).await?;
    store.set_attachment(&record.id, blob_ref("clear-b1")).await?;

    let matched = store.clear_attachment(&record.id, None).await?;
    assert_eq!(matched, 1);
    let fetched = store.get(&record.id).await?.expect("record should exist");
    assert!(fetched.attachment.is_none(), "attachment should be cleared");

    let matched = store.clear_attachment(&RecordId::generate(), None).await?;
    assert_eq!(matched, 0, "clear on missing record should match nothing");
    Ok(())
}

async fn test_clear_attachment_conditional(store: &dyn RecordStore) -> Result<(), RecordError> {
    let record = store.create(fields("conditional")).await?;
    let current = blob_ref("cond-b2");
    store.set_attachment(&record.id, current.clone()).await?;

    let stale = BlobId::new("cond-b1");
    let matched = store.clear_attachment(&record.id, Some(&stale)).await?;
    assert_eq!(matched, 0, "clear with stale blob id should match nothing");
    let fetched = store.get(&record.id).await?.expect("record should exist");
    assert_eq!(fetched.attachment, Some(current.clone()), "newer reference kept");

    let matched = store
        .clear_attachment(&record.id, Some(&current.blob_id))
        .await?;
    assert_eq!(matched, 1);
    let fetched = store.get(&record.id).await?.expect("record should exist");
    assert!(fetched.attachment.is_none());
    Ok(())
}

async fn test_delete(store: &dyn RecordStore) -> Result<(), RecordError> {
    let record = store.create(fields("delete")).await?;
    store.set_attachment(&record.id, blob_ref("del-b1")).await?;

    let removed = store.delete(&record.id).await?.expect("delete should return the row");
    assert_eq!(removed.id, record.id);
    assert_eq!(removed.attachment_blob().map(BlobId::as_str), Some("del-b1"));
    assert!(store.get(&record.id).await?.is_none(), "get after delete should return None");

    assert!(
        store.delete(&record.id).await?.is_none(),
        "delete on missing record should return None"
    );
    Ok(())
}

async fn test_referenced_blobs(store: &dyn RecordStore) -> Result<(), RecordError> {
    let record = store.create(fields("refs")).await?;
    store.set_attachment(&record.id, blob_ref("ref-b1")).await?;

    let candidates = [
        BlobId::new("ref-b1"),
        BlobId::new("del-b1"),
        BlobId::new("clear-b1"),
        BlobId::new("never-attached"),
    ];
    let refs = store.referenced_blobs(&candidates).await?;
    assert_eq!(refs, vec![BlobId::new("ref-b1")], "only live references are returned");

    let other = store.create(fields("refs-other")).await?;
    store.set_attachment(&other.id, blob_ref("ref-b2")).await?;
    let refs = store.referenced_blobs(&candidates[..1]).await?;
    assert_eq!(
        refs,
        vec![BlobId::new("ref-b1")],
        "references outside the candidates are skipped"
    );

    assert!(store.referenced_blobs(&[]).await?.is_empty());
    Ok(())
}
