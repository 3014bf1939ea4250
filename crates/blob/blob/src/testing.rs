use std::io;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use coffer_core::BlobId;

use crate::error::BlobError;
use crate::store::BlobStore;
use crate::stream::{collect, from_bytes, from_chunks};

/// Run the full blob store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
/// Backends should be configured with a small chunk size so that the
/// multi-chunk cases actually span several chunks.
///
/// # Errors
///
/// Returns an error if any storage operation fails unexpectedly.
pub async fn run_blob_store_conformance_tests(store: &dyn BlobStore) -> Result<(), BlobError> {
    test_read_missing(store).await?;
    test_write_and_read(store).await?;
    test_empty_blob(store).await?;
    test_multi_chunk(store).await?;
    test_failed_source_discards(store).await?;
    test_delete(store).await?;
    test_distinct_ids(store).await?;
    test_list(store).await?;
    test_list_after_pages(store).await?;
    Ok(())
}

/// Deterministic payload of `len` bytes.
#[must_use]
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect()
}

async fn read_all(store: &dyn BlobStore, id: &BlobId) -> Result<Option<Bytes>, BlobError> {
    let Some(download) = store.read(id).await? else {
        return Ok(None);
    };
    let data = collect(download.stream)
        .await
        .map_err(|e| BlobError::Storage(e.to_string()))?;
    Ok(Some(data))
}

async fn test_read_missing(store: &dyn BlobStore) -> Result<(), BlobError> {
    let id = BlobId::new("does-not-exist");
    assert!(store.read(&id).await?.is_none(), "read on missing blob should return None");
    assert!(
        store.metadata(&id).await?.is_none(),
        "metadata on missing blob should return None"
    );
    Ok(())
}

async fn test_write_and_read(store: &dyn BlobStore) -> Result<(), BlobError> {
    let meta = store
        .write("report.pdf", "application/pdf", from_bytes("hello world"))
        .await?;
    assert_eq!(meta.filename, "report.pdf");
    assert_eq!(meta.content_type, "application/pdf");
    assert_eq!(meta.size_bytes, 11);
    assert_eq!(
        meta.checksum_sha256,
        hex::encode(Sha256::digest(b"hello world"))
    );

    let download = store.read(&meta.id).await?.expect("blob should exist");
    assert_eq!(download.metadata, meta);
    let data = collect(download.stream)
        .await
        .map_err(|e| BlobError::Storage(e.to_string()))?;
    assert_eq!(&data[..], b"hello world");

    let stored = store.metadata(&meta.id).await?.expect("metadata should exist");
    assert_eq!(stored, meta);
    Ok(())
}

async fn test_empty_blob(store: &dyn BlobStore) -> Result<(), BlobError> {
    let meta = store
        .write("empty.bin", "application/octet-stream", from_chunks(Vec::new()))
        .await?;
    assert_eq!(meta.size_bytes, 0);
    let data = read_all(store, &meta.id).await?.expect("empty blob should exist");
    assert!(data.is_empty());
    Ok(())
}

async fn test_multi_chunk(store: &dyn BlobStore) -> Result<(), BlobError> {
    let payload = pattern(70_000);
    // Irregular source pieces that straddle chunk boundaries.
    let pieces: Vec<io::Result<Bytes>> = payload
        .chunks(9_999)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let meta = store
        .write("big.bin", "application/octet-stream", from_chunks(pieces))
        .await?;
    assert_eq!(meta.size_bytes, 70_000);

    let data = read_all(store, &meta.id).await?.expect("blob should exist");
    assert_eq!(data.len(), payload.len());
    assert!(data[..] == payload[..], "multi-chunk content should round-trip");
    Ok(())
}

async fn test_failed_source_discards(store: &dyn BlobStore) -> Result<(), BlobError> {
    let before = store.list(None).await?.len();

    let source = from_chunks(vec![
        Ok(Bytes::from(pattern(40_000))),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ]);
    let result = store.write("broken.bin", "text/plain", source).await;
    match result {
        Err(BlobError::Transfer { offset, source }) => {
            assert_eq!(offset, 40_000, "offset should count accepted bytes");
            assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
        }
        other => panic!("expected Transfer error, got {other:?}"),
    }

    let after = store.list(None).await?.len();
    assert_eq!(before, after, "failed write should not leave a blob behind");
    Ok(())
}

async fn test_delete(store: &dyn BlobStore) -> Result<(), BlobError> {
    let meta = store
        .write("gone.txt", "text/plain", from_bytes(pattern(50_000)))
        .await?;
    assert!(store.delete(&meta.id).await?, "delete should return true for existing blob");
    assert!(store.read(&meta.id).await?.is_none(), "read after delete should return None");
    assert!(store.metadata(&meta.id).await?.is_none());
    assert!(
        !store.delete(&meta.id).await?,
        "delete on missing blob should return false"
    );
    Ok(())
}

async fn test_distinct_ids(store: &dyn BlobStore) -> Result<(), BlobError> {
    let a = store.write("same.txt", "text/plain", from_bytes("same")).await?;
    let b = store.write("same.txt", "text/plain", from_bytes("same")).await?;
    assert_ne!(a.id, b.id, "each write should produce a new blob");
    assert_eq!(a.checksum_sha256, b.checksum_sha256);
    Ok(())
}

async fn test_list(store: &dyn BlobStore) -> Result<(), BlobError> {
    let meta = store.write("listed.txt", "text/plain", from_bytes("x")).await?;
    let all = store.list(None).await?;
    assert!(all.iter().any(|m| m.id == meta.id), "list should include new blob");
    assert!(
        all.windows(2).all(|w| w[0].created_at <= w[1].created_at),
        "list should be ordered oldest first"
    );

    let limited = store.list(Some(1)).await?;
    assert_eq!(limited.len(), 1);
    Ok(())
}

async fn test_list_after_pages(store: &dyn BlobStore) -> Result<(), BlobError> {
    for n in 0..3 {
        store
            .write(&format!("page-{n}.txt"), "text/plain", from_bytes("p"))
            .await?;
    }
    let all = store.list(None).await?;

    let mut paged = Vec::new();
    let mut after = None;
    loop {
        let page = store.list_after(after.as_ref(), 2).await?;
        assert!(page.len() <= 2, "page should respect the limit");
        let Some(last) = page.last().cloned() else {
            break;
        };
        paged.extend(page);
        after = Some(last);
    }
    let listed: Vec<_> = all.iter().map(|m| &m.id).collect();
    let walked: Vec<_> = paged.iter().map(|m| &m.id).collect();
    assert_eq!(walked, listed, "pages should walk every blob once, in list order");

    // Deleting behind the cursor does not shift later pages.
    let first = store.list_after(None, 1).await?;
    store.delete(&first[0].id).await?;
    let next = store.list_after(Some(&first[0]), 1).await?;
    assert_eq!(next.first().map(|m| &m.id), all.get(1).map(|m| &m.id));
    Ok(())
}
