use sqlx::SqlitePool;

use crate::config::SqliteConfig;

/// Run database migrations, creating required tables if they do not exist.
///
/// This creates the records, blobs and blob parts tables with the configured
/// table prefix. Parts reference their blob with `ON DELETE CASCADE`. A blob
/// row with `committed = 0` belongs to a write that has not finished.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &SqlitePool, config: &SqliteConfig) -> Result<(), sqlx::Error> {
    let records_table = config.records_table();
    let blobs_table = config.blobs_table();
    let parts_table = config.blob_parts_table();
    let prefix = &config.table_prefix;

    // Timestamps are stored as unix microseconds.
    let create_records = format!(
        "CREATE TABLE IF NOT EXISTS {records_table} (
            id TEXT PRIMARY KEY,
            request_iv TEXT,
            mode TEXT,
            aes_length TEXT,
            request_password TEXT,
            file_name TEXT,
            operation TEXT,
            created_at INTEGER NOT NULL,
            attachment_blob_id TEXT,
            attachment_name TEXT,
            attached_at INTEGER
        )"
    );

    let create_records_created_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}records_created_at_idx \
         ON {records_table} (created_at)"
    );

    let create_records_attachment_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}records_attachment_idx \
         ON {records_table} (attachment_blob_id)"
    );

    let create_blobs = format!(
        "CREATE TABLE IF NOT EXISTS {blobs_table} (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            checksum_sha256 TEXT NOT NULL,
            part_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            committed INTEGER NOT NULL DEFAULT 0
        )"
    );

    let create_blobs_listing_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}blobs_listing_idx \
         ON {blobs_table} (committed, created_at, id)"
    );

    let create_parts = format!(
        "CREATE TABLE IF NOT EXISTS {parts_table} (
            blob_id TEXT NOT NULL REFERENCES {blobs_table} (id) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (blob_id, seq)
        )"
    );

    sqlx::query(&create_records).execute(pool).await?;
    sqlx::query(&create_records_created_idx)
        .execute(pool)
        .await?;
    sqlx::query(&create_records_attachment_idx)
        .execute(pool)
        .await?;
    sqlx::query(&create_blobs).execute(pool).await?;
    sqlx::query(&create_blobs_listing_idx)
        .execute(pool)
        .await?;
    sqlx::query(&create_parts).execute(pool).await?;

    Ok(())
}
