use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use coffer_core::{AttachmentRef, BlobId, Record, RecordFields, RecordId};
use coffer_record::error::RecordError;
use coffer_record::store::{AttachmentUpdate, RecordStore};

use crate::config::SqliteConfig;
use crate::{migrations, pool};

const RECORD_COLUMNS: &str = "id, request_iv, mode, aes_length, request_password, file_name, \
     operation, created_at, attachment_blob_id, attachment_name, attached_at";

/// SQLite-backed implementation of [`RecordStore`].
///
/// Attachment swaps use a compare-and-swap on `attachment_blob_id`, retried
/// until the reference read beforehand is the one replaced.
pub struct SqliteRecordStore {
    pool: SqlitePool,
    config: Arc<SqliteConfig>,
}

impl SqliteRecordStore {
    /// Create a new `SqliteRecordStore` from the provided configuration.
    ///
    /// Opens the database, creates the connection pool, and runs migrations
    /// to ensure the required tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Connection`] if pool creation fails, or
    /// [`RecordError::Backend`] if migrations fail.
    pub async fn new(config: SqliteConfig) -> Result<Self, RecordError> {
        let pool = pool::connect(&config)
            .await
            .map_err(|e| RecordError::Connection(e.to_string()))?;
        Self::from_pool(pool, config).await
    }

    /// Create a `SqliteRecordStore` from an existing pool and config.
    ///
    /// This is useful for sharing a pool with [`SqliteBlobStore`](crate::SqliteBlobStore).
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Backend`] if migrations fail.
    pub async fn from_pool(pool: SqlitePool, config: SqliteConfig) -> Result<Self, RecordError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| RecordError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }
}

fn backend(e: sqlx::Error) -> RecordError {
    RecordError::Backend(e.to_string())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, fields: RecordFields) -> Result<Record, RecordError> {
        let record = Record::new(fields.with_generated_iv());
        let sql = format!(
            "INSERT INTO {} (id, request_iv, mode, aes_length, request_password, file_name, \
             operation, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.config.records_table()
        );

        sqlx::query(&sql)
            .bind(record.id.to_string())
            .bind(record.fields.request_iv.as_deref())
            .bind(record.fields.mode.as_deref())
            .bind(record.fields.aes_length.as_deref())
            .bind(record.fields.request_password.as_deref())
            .bind(record.fields.file_name.as_deref())
            .bind(record.fields.operation.as_deref())
            .bind(record.created_at.timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(record)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>, RecordError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE id = ?",
            self.config.records_table()
        );

        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Record::try_from).transpose()
    }

    async fn get_many(&self, ids: &[RecordId]) -> Result<Vec<Record>, RecordError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE id IN (",
            self.config.records_table()
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        let rows: Vec<RecordRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut by_id = HashMap::with_capacity(rows.len());
        for row in rows {
            let record = Record::try_from(row)?;
            by_id.insert(record.id, record);
        }
        Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Record>, RecordError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} ORDER BY created_at DESC, id DESC LIMIT ?",
            self.config.records_table()
        );

        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.into_iter().map(Record::try_from).collect()
    }

    async fn update_iv(&self, id: &RecordId, iv: &str) -> Result<u64, RecordError> {
        let sql = format!(
            "UPDATE {} SET request_iv = ? WHERE id = ?",
            self.config.records_table()
        );

        let result = sqlx::query(&sql)
            .bind(iv)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected())
    }

    async fn set_attachment(
        &self,
        id: &RecordId,
        attachment: AttachmentRef,
    ) -> Result<AttachmentUpdate, RecordError> {
        let sql = format!(
            "UPDATE {} SET attachment_blob_id = ?, attachment_name = ?, attached_at = ? \
             WHERE id = ? AND attachment_blob_id IS ?",
            self.config.records_table()
        );

        loop {
            let Some(current) = self.get(id).await? else {
                return Ok(AttachmentUpdate::NotFound);
            };
            let previous_blob = current.attachment_blob().map(BlobId::as_str);

            let result = sqlx::query(&sql)
                .bind(attachment.blob_id.as_str())
                .bind(attachment.name.as_str())
                .bind(attachment.attached_at.timestamp_micros())
                .bind(id.to_string())
                .bind(previous_blob)
                .execute(&self.pool)
                .await
                .map_err(backend)?;

            if result.rows_affected() == 1 {
                return Ok(AttachmentUpdate::Applied {
                    previous: current.attachment,
                });
            }
            debug!(record_id = %id, "attachment changed concurrently, retrying swap");
        }
    }

    async fn clear_attachment(
        &self,
        id: &RecordId,
        expected: Option<&BlobId>,
    ) -> Result<u64, RecordError> {
        let table = self.config.records_table();
        let clear = "SET attachment_blob_id = NULL, attachment_name = NULL, attached_at = NULL";

        let result = match expected {
            Some(blob_id) => {
                let sql = format!("UPDATE {table} {clear} WHERE id = ? AND attachment_blob_id = ?");
                sqlx::query(&sql)
                    .bind(id.to_string())
                    .bind(blob_id.as_str())
                    .execute(&self.pool)
                    .await
            }
            None => {
                let sql = format!("UPDATE {table} {clear} WHERE id = ?");
                sqlx::query(&sql)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(backend)?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: &RecordId) -> Result<Option<Record>, RecordError> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ? RETURNING {RECORD_COLUMNS}",
            self.config.records_table()
        );

        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Record::try_from).transpose()
    }

    async fn referenced_blobs(&self, candidates: &[BlobId]) -> Result<Vec<BlobId>, RecordError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT DISTINCT attachment_blob_id FROM {} WHERE attachment_blob_id IN (",
            self.config.records_table()
        ));
        let mut separated = qb.separated(", ");
        for id in candidates {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let ids: Vec<String> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(ids.into_iter().map(BlobId::from).collect())
    }
}

/// Internal row type for mapping database rows to `Record`.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    request_iv: Option<String>,
    mode: Option<String>,
    aes_length: Option<String>,
    request_password: Option<String>,
    file_name: Option<String>,
    operation: Option<String>,
    created_at: i64,
    attachment_blob_id: Option<String>,
    attachment_name: Option<String>,
    attached_at: Option<i64>,
}

fn timestamp(micros: i64) -> Result<DateTime<Utc>, RecordError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| RecordError::Serialization(format!("timestamp out of range: {micros}")))
}

impl TryFrom<RecordRow> for Record {
    type Error = RecordError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let id = RecordId::parse(&row.id).map_err(|e| RecordError::Serialization(e.to_string()))?;

        let attachment = match (row.attachment_blob_id, row.attachment_name, row.attached_at) {
            (Some(blob_id), Some(name), Some(attached_at)) => Some(AttachmentRef {
                blob_id: BlobId::from(blob_id),
                name,
                attached_at: timestamp(attached_at)?,
            }),
            (None, None, None) => None,
            _ => {
                return Err(RecordError::Serialization(format!(
                    "record {id} has a partial attachment reference"
                )));
            }
        };

        Ok(Self {
            id,
            fields: RecordFields {
                request_iv: row.request_iv,
                mode: row.mode,
                aes_length: row.aes_length,
                request_password: row.request_password,
                file_name: row.file_name,
                operation: row.operation,
            },
            created_at: timestamp(row.created_at)?,
            attachment,
        })
    }
}
