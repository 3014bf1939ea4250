use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use coffer_blob::{BlobDownload, BlobError, BlobMetadata, BlobStore, ByteStream, Checksum};
use coffer_core::BlobId;

use crate::config::SqliteConfig;
use crate::{migrations, pool};

const BLOB_COLUMNS: &str =
    "id, filename, content_type, size_bytes, checksum_sha256, part_count, created_at";

/// SQLite-backed implementation of [`BlobStore`].
///
/// Content is split into parts stored as rows of `prefix_blob_parts`, so no
/// single statement carries the full payload. Every statement of a write
/// commits on its own; the descriptor stays `committed = 0`, invisible to
/// readers, until the last part is in. No transaction is held while the
/// source is polled, so a slow upload never locks the database.
pub struct SqliteBlobStore {
    pool: SqlitePool,
    config: Arc<SqliteConfig>,
}

impl SqliteBlobStore {
    /// Create a new `SqliteBlobStore` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Storage`] if the database cannot be opened or
    /// migrations fail.
    pub async fn new(config: SqliteConfig) -> Result<Self, BlobError> {
        let pool = pool::connect(&config).await.map_err(storage)?;
        Self::from_pool(pool, config).await
    }

    /// Create a `SqliteBlobStore` from an existing pool and config.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Storage`] if migrations fail.
    pub async fn from_pool(pool: SqlitePool, config: SqliteConfig) -> Result<Self, BlobError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(storage)?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    async fn insert_part(
        &self,
        sql: &str,
        id: &BlobId,
        seq: i64,
        data: &[u8],
    ) -> Result<(), BlobError> {
        sqlx::query(sql)
            .bind(id.as_str())
            .bind(seq)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn fetch_row(&self, id: &BlobId) -> Result<Option<BlobRow>, BlobError> {
        let sql = format!(
            "SELECT {BLOB_COLUMNS} FROM {} WHERE id = ? AND committed = 1",
            self.config.blobs_table()
        );
        sqlx::query_as::<_, BlobRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)
    }
}

fn storage(e: sqlx::Error) -> BlobError {
    BlobError::Storage(e.to_string())
}

fn to_i64(value: u64) -> Result<i64, BlobError> {
    i64::try_from(value).map_err(|_| BlobError::Storage(format!("value out of range: {value}")))
}

/// Descriptor and parts of a write in progress.
///
/// Dropping the guard before [`PendingBlob::commit`] deletes the descriptor
/// on a background task; parts follow through `ON DELETE CASCADE`. Rows that
/// survive a crash are collected by [`BlobStore::purge_incomplete`].
struct PendingBlob {
    pool: SqlitePool,
    delete_sql: String,
    id: BlobId,
    armed: bool,
}

impl PendingBlob {
    fn commit(mut self) {
        self.armed = false;
    }

    /// Remove the partial rows before returning `err`.
    async fn abort(mut self, err: BlobError) -> BlobError {
        let result = sqlx::query(&self.delete_sql)
            .bind(self.id.as_str())
            .execute(&self.pool)
            .await;
        self.armed = false;
        match result {
            Ok(_) => debug!(blob_id = %self.id, "discarded partial blob"),
            Err(e) => warn!(blob_id = %self.id, error = %e, "failed to discard partial blob"),
        }
        err
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(blob_id = %self.id, "no runtime to discard partial blob");
            return;
        };
        let pool = self.pool.clone();
        let sql = std::mem::take(&mut self.delete_sql);
        let id = self.id.clone();
        handle.spawn(async move {
            match sqlx::query(&sql).bind(id.as_str()).execute(&pool).await {
                Ok(_) => debug!(blob_id = %id, "discarded cancelled blob"),
                Err(e) => warn!(blob_id = %id, error = %e, "failed to discard cancelled blob"),
            }
        });
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn write(
        &self,
        filename: &str,
        content_type: &str,
        mut data: ByteStream<'_>,
    ) -> Result<BlobMetadata, BlobError> {
        let part_size = self.config.effective_part_size();
        let id = BlobId::new(Uuid::now_v7().to_string());
        let blobs_table = self.config.blobs_table();
        let insert_part = format!(
            "INSERT INTO {} (blob_id, seq, data) VALUES (?, ?, ?)",
            self.config.blob_parts_table()
        );

        // The descriptor row goes first so parts satisfy the foreign key. Its
        // timestamp marks the start of the write until the final update.
        let insert_blob = format!(
            "INSERT INTO {blobs_table} ({BLOB_COLUMNS}, committed) \
             VALUES (?, ?, ?, 0, '', 0, ?, 0)"
        );
        sqlx::query(&insert_blob)
            .bind(id.as_str())
            .bind(filename)
            .bind(content_type)
            .bind(coffer_core::now().timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        let pending = PendingBlob {
            pool: self.pool.clone(),
            delete_sql: format!("DELETE FROM {blobs_table} WHERE id = ? AND committed = 0"),
            id: id.clone(),
            armed: true,
        };
        let mut checksum = Checksum::new();
        let mut buf = BytesMut::with_capacity(part_size);
        let mut seq: i64 = 0;

        while let Some(item) = data.next().await {
            let piece = match item {
                Ok(piece) => piece,
                Err(source) => {
                    let err = BlobError::Transfer {
                        offset: checksum.len(),
                        source,
                    };
                    return Err(pending.abort(err).await);
                }
            };
            checksum.update(&piece);

            let mut rest = &piece[..];
            while !rest.is_empty() {
                let take = (part_size - buf.len()).min(rest.len());
                buf.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if buf.len() == part_size {
                    let part = buf.split();
                    if let Err(e) = self.insert_part(&insert_part, &id, seq, &part).await {
                        return Err(pending.abort(e).await);
                    }
                    seq += 1;
                }
            }
        }
        if !buf.is_empty() {
            if let Err(e) = self.insert_part(&insert_part, &id, seq, &buf).await {
                return Err(pending.abort(e).await);
            }
            seq += 1;
        }

        let (size_bytes, checksum_sha256) = checksum.finish();
        let size = match to_i64(size_bytes) {
            Ok(size) => size,
            Err(e) => return Err(pending.abort(e).await),
        };
        let created_at = coffer_core::now();
        let finalize = format!(
            "UPDATE {blobs_table} SET size_bytes = ?, checksum_sha256 = ?, part_count = ?, \
             created_at = ?, committed = 1 WHERE id = ? AND committed = 0"
        );
        let finalized = sqlx::query(&finalize)
            .bind(size)
            .bind(&checksum_sha256)
            .bind(seq)
            .bind(created_at.timestamp_micros())
            .bind(id.as_str())
            .execute(&self.pool)
            .await;
        match finalized {
            Ok(result) if result.rows_affected() == 1 => pending.commit(),
            Ok(_) => {
                let err = BlobError::Storage(format!("blob {id} was purged before it completed"));
                return Err(pending.abort(err).await);
            }
            Err(e) => return Err(pending.abort(storage(e)).await),
        }

        debug!(blob_id = %id, bytes = size_bytes, parts = seq, "blob written");
        Ok(BlobMetadata {
            id,
            filename: filename.to_owned(),
            content_type: content_type.to_owned(),
            size_bytes,
            checksum_sha256,
            created_at,
        })
    }

    async fn read(&self, id: &BlobId) -> Result<Option<BlobDownload>, BlobError> {
        let Some(row) = self.fetch_row(id).await? else {
            return Ok(None);
        };

        let cursor = PartCursor {
            pool: self.pool.clone(),
            sql: Arc::from(format!(
                "SELECT data FROM {} WHERE blob_id = ? AND seq = ?",
                self.config.blob_parts_table()
            )),
            blob_id: id.clone(),
            next: 0,
            count: row.part_count,
        };
        let stream = stream::unfold(cursor, PartCursor::advance).boxed();

        Ok(Some(BlobDownload {
            metadata: row.try_into()?,
            stream,
        }))
    }

    async fn metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>, BlobError> {
        self.fetch_row(id).await?.map(BlobMetadata::try_from).transpose()
    }

    async fn delete(&self, id: &BlobId) -> Result<bool, BlobError> {
        // Parts follow through ON DELETE CASCADE.
        let sql = format!(
            "DELETE FROM {} WHERE id = ? AND committed = 1",
            self.config.blobs_table()
        );
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        let existed = result.rows_affected() > 0;
        if existed {
            debug!(blob_id = %id, "blob deleted");
        }
        Ok(existed)
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<BlobMetadata>, BlobError> {
        let sql = format!(
            "SELECT {BLOB_COLUMNS} FROM {} WHERE committed = 1 \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            self.config.blobs_table()
        );
        // A negative LIMIT means no limit in SQLite.
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows = sqlx::query_as::<_, BlobRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.into_iter().map(BlobMetadata::try_from).collect()
    }

    async fn list_after(
        &self,
        after: Option<&BlobMetadata>,
        limit: usize,
    ) -> Result<Vec<BlobMetadata>, BlobError> {
        let Some(after) = after else {
            return self.list(Some(limit)).await;
        };
        let sql = format!(
            "SELECT {BLOB_COLUMNS} FROM {} WHERE committed = 1 \
             AND (created_at > ? OR (created_at = ? AND id > ?)) \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            self.config.blobs_table()
        );
        let created_at = after.created_at.timestamp_micros();

        let rows = sqlx::query_as::<_, BlobRow>(&sql)
            .bind(created_at)
            .bind(created_at)
            .bind(after.id.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.into_iter().map(BlobMetadata::try_from).collect()
    }

    async fn purge_incomplete(&self, older_than: DateTime<Utc>) -> Result<u64, BlobError> {
        let sql = format!(
            "DELETE FROM {} WHERE committed = 0 AND created_at < ?",
            self.config.blobs_table()
        );
        let result = sqlx::query(&sql)
            .bind(older_than.timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "incomplete blobs purged");
        }
        Ok(purged)
    }
}

/// Lazy reader over the parts of one blob, one query per poll.
struct PartCursor {
    pool: SqlitePool,
    sql: Arc<str>,
    blob_id: BlobId,
    next: i64,
    count: i64,
}

impl PartCursor {
    async fn advance(mut self) -> Option<(std::io::Result<Bytes>, Self)> {
        if self.next >= self.count {
            return None;
        }

        let fetched: Result<Option<Vec<u8>>, sqlx::Error> = sqlx::query_scalar(&self.sql)
            .bind(self.blob_id.as_str())
            .bind(self.next)
            .fetch_optional(&self.pool)
            .await;

        let item = match fetched {
            Ok(Some(data)) => Ok(Bytes::from(data)),
            Ok(None) => {
                warn!(blob_id = %self.blob_id, part = self.next, "part missing during read");
                Err(BlobError::Corrupted(format!(
                    "blob {} is missing part {}",
                    self.blob_id, self.next
                ))
                .into_io())
            }
            Err(e) => Err(storage(e).into_io()),
        };

        // Stop after the first error.
        self.next = if item.is_ok() { self.next + 1 } else { self.count };
        Some((item, self))
    }
}

/// Internal row type for mapping database rows to `BlobMetadata`.
#[derive(sqlx::FromRow)]
struct BlobRow {
    id: String,
    filename: String,
    content_type: String,
    size_bytes: i64,
    checksum_sha256: String,
    part_count: i64,
    created_at: i64,
}

impl TryFrom<BlobRow> for BlobMetadata {
    type Error = BlobError;

    fn try_from(row: BlobRow) -> Result<Self, Self::Error> {
        let created_at = DateTime::from_timestamp_micros(row.created_at).ok_or_else(|| {
            BlobError::Storage(format!("timestamp out of range: {}", row.created_at))
        })?;

        Ok(Self {
            id: BlobId::from(row.id),
            filename: row.filename,
            content_type: row.content_type,
            #[allow(clippy::cast_sign_loss)]
            size_bytes: row.size_bytes as u64,
            checksum_sha256: row.checksum_sha256,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use coffer_blob::testing::{pattern, run_blob_store_conformance_tests};
    use coffer_blob::{collect, from_bytes, from_chunks};

    use super::*;

    async fn store() -> SqliteBlobStore {
        SqliteBlobStore::new(SqliteConfig {
            part_size: 4096,
            ..SqliteConfig::in_memory()
        })
        .await
        .expect("in-memory database should open")
    }

    async fn part_rows(store: &SqliteBlobStore) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", store.config.blob_parts_table());
        sqlx::query_scalar(&sql).fetch_one(&store.pool).await.unwrap()
    }

    async fn descriptor_rows(store: &SqliteBlobStore) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", store.config.blobs_table());
        sqlx::query_scalar(&sql).fetch_one(&store.pool).await.unwrap()
    }

    /// 9000 bytes, then a source that never yields again.
    fn stalled_source() -> ByteStream<'static> {
        stream::iter(vec![Ok::<_, io::Error>(Bytes::from(pattern(9_000)))])
            .chain(stream::pending())
            .boxed()
    }

    /// Wait for the background cleanup of a dropped write.
    async fn wait_until_empty(store: &SqliteBlobStore) {
        for _ in 0..100 {
            if descriptor_rows(store).await == 0 && part_rows(store).await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("partial blob rows were not removed");
    }

    #[tokio::test]
    async fn conformance() {
        let store = store().await;
        run_blob_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn content_is_split_into_parts() {
        let store = store().await;
        store
            .write("a.bin", "application/octet-stream", from_bytes(pattern(10_000)))
            .await
            .unwrap();
        assert_eq!(part_rows(&store).await, 3);
    }

    #[tokio::test]
    async fn delete_cascades_to_parts() {
        let store = store().await;
        let meta = store
            .write("a.bin", "application/octet-stream", from_bytes(pattern(9_000)))
            .await
            .unwrap();
        assert!(store.delete(&meta.id).await.unwrap());
        assert_eq!(part_rows(&store).await, 0);
    }

    #[tokio::test]
    async fn failed_source_rolls_back_parts() {
        let store = store().await;
        let source = from_chunks(vec![
            Ok(Bytes::from(pattern(12_000))),
            Err(io::Error::other("boom")),
        ]);
        let err = store.write("x", "text/plain", source).await.unwrap_err();
        assert!(matches!(err, BlobError::Transfer { offset: 12_000, .. }));
        assert_eq!(part_rows(&store).await, 0);
        assert_eq!(descriptor_rows(&store).await, 0);
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_write_is_cleaned_up() {
        let store = store().await;

        let write = store.write("stalled.bin", "text/plain", stalled_source());
        let result = tokio::time::timeout(Duration::from_millis(200), write).await;
        assert!(result.is_err(), "write should still be pending");

        wait_until_empty(&store).await;
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stalled_upload_does_not_block_record_writes() {
        // One connection: a transaction held across the upload would starve
        // every other statement.
        let config = SqliteConfig {
            part_size: 4096,
            ..SqliteConfig::in_memory()
        };
        let pool = pool::connect(&config).await.unwrap();
        let blobs = SqliteBlobStore::from_pool(pool.clone(), config.clone())
            .await
            .unwrap();
        let records = crate::SqliteRecordStore::from_pool(pool, config).await.unwrap();

        let mut write = Box::pin(blobs.write("stalled.bin", "text/plain", stalled_source()));
        let pending = tokio::time::timeout(Duration::from_millis(200), &mut write).await;
        assert!(pending.is_err(), "write should still wait on its source");
        assert_eq!(part_rows(&blobs).await, 2, "full parts are already stored");

        let created = tokio::time::timeout(
            Duration::from_secs(2),
            coffer_record::RecordStore::create(&records, Default::default()),
        )
        .await
        .expect("record insert should not wait for the upload");
        assert!(created.is_ok());

        // The unfinished blob is invisible.
        assert!(blobs.list(None).await.unwrap().is_empty());
        assert!(blobs.list_after(None, 10).await.unwrap().is_empty());

        drop(write);
        wait_until_empty(&blobs).await;
    }

    #[tokio::test]
    async fn unfinished_write_is_hidden_and_purged() {
        let store = store().await;
        let done = store
            .write("done.txt", "text/plain", from_bytes("done"))
            .await
            .unwrap();

        // A leaked future never runs its guard, like a crash mid-upload.
        let mut write = Box::pin(store.write("lost.bin", "text/plain", stalled_source()));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), &mut write)
                .await
                .is_err()
        );
        std::mem::forget(write);
        assert_eq!(descriptor_rows(&store).await, 2);

        let listed = store.list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, done.id);

        let an_hour_ago = coffer_core::now() - chrono::Duration::hours(1);
        assert_eq!(store.purge_incomplete(an_hour_ago).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.purge_incomplete(coffer_core::now()).await.unwrap(), 1);
        assert_eq!(descriptor_rows(&store).await, 1);
        assert_eq!(part_rows(&store).await, 1, "only the finished blob's part is left");
        assert!(store.read(&done.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_part_surfaces_as_stream_error() {
        let store = store().await;
        let meta = store
            .write("a.bin", "application/octet-stream", from_bytes(pattern(10_000)))
            .await
            .unwrap();
        let sql = format!(
            "DELETE FROM {} WHERE blob_id = ? AND seq = 1",
            store.config.blob_parts_table()
        );
        sqlx::query(&sql)
            .bind(meta.id.as_str())
            .execute(&store.pool)
            .await
            .unwrap();

        let download = store.read(&meta.id).await.unwrap().unwrap();
        let err = collect(download.stream).await.unwrap_err();
        assert!(err.to_string().contains("missing part 1"));
    }

    #[tokio::test]
    async fn shares_pool_with_record_store() {
        let config = SqliteConfig {
            part_size: 4096,
            ..SqliteConfig::in_memory()
        };
        let pool = pool::connect(&config).await.unwrap();
        let blobs = SqliteBlobStore::from_pool(pool.clone(), config.clone())
            .await
            .unwrap();
        let records = crate::SqliteRecordStore::from_pool(pool, config).await.unwrap();

        let meta = blobs
            .write("shared.txt", "text/plain", from_bytes("shared"))
            .await
            .unwrap();
        let record = coffer_record::RecordStore::create(&records, Default::default())
            .await
            .unwrap();
        let update = coffer_record::RecordStore::set_attachment(
            &records,
            &record.id,
            coffer_core::AttachmentRef::now(meta.id.clone(), "shared.txt"),
        )
        .await
        .unwrap();
        assert_eq!(update.matched_count(), 1);
    }
}
