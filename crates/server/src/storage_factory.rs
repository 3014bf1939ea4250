use std::sync::Arc;

use coffer_blob::BlobStore;
use coffer_blob_chunked::{ChunkedBlobStore, ChunkedConfig};
use coffer_record::RecordStore;
use coffer_record_memory::MemoryRecordStore;
use coffer_sqlite::{SqliteBlobStore, SqliteConfig, SqliteRecordStore};
use tracing::info;

use crate::config::StorageConfig;
use crate::error::ServerError;

/// Record and blob store handles shared by every request.
pub struct Stores {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Create the record and blob stores from the given configuration.
///
/// The `sqlite` backend opens one pool shared by both stores and runs
/// migrations before returning.
pub async fn create_stores(config: &StorageConfig) -> Result<Stores, ServerError> {
    match config.backend.as_str() {
        "chunked" => {
            let chunked = match config.chunk_size_bytes {
                Some(chunk_size) => ChunkedConfig { chunk_size },
                None => ChunkedConfig::default(),
            };
            info!(chunk_size = chunked.chunk_size, "using in-process chunked storage");
            Ok(Stores {
                records: Arc::new(MemoryRecordStore::new()),
                blobs: Arc::new(ChunkedBlobStore::with_config(chunked)),
            })
        }
        "sqlite" => {
            let sqlite = sqlite_config(config);
            let pool = coffer_sqlite::connect(&sqlite)
                .await
                .map_err(|e| ServerError::Config(format!("sqlite: {e}")))?;

            let records = SqliteRecordStore::from_pool(pool.clone(), sqlite.clone())
                .await
                .map_err(|e| ServerError::Config(format!("sqlite records: {e}")))?;
            let blobs = SqliteBlobStore::from_pool(pool, sqlite)
                .await
                .map_err(|e| ServerError::Config(format!("sqlite blobs: {e}")))?;

            info!(url = %config.url, "using sqlite storage");
            Ok(Stores {
                records: Arc::new(records),
                blobs: Arc::new(blobs),
            })
        }
        other => Err(ServerError::Config(format!(
            "unknown storage backend: {other}"
        ))),
    }
}

/// Run the schema migrations of the configured backend.
pub async fn run_migrations(config: &StorageConfig) -> Result<(), ServerError> {
    if config.backend != "sqlite" {
        info!(backend = %config.backend, "backend has no schema, nothing to migrate");
        return Ok(());
    }

    let sqlite = sqlite_config(config);
    let pool = coffer_sqlite::connect(&sqlite)
        .await
        .map_err(|e| ServerError::Config(format!("sqlite: {e}")))?;
    coffer_sqlite::run_migrations(&pool, &sqlite)
        .await
        .map_err(|e| ServerError::Config(format!("sqlite migrations: {e}")))?;
    pool.close().await;
    Ok(())
}

fn sqlite_config(config: &StorageConfig) -> SqliteConfig {
    let defaults = SqliteConfig::default();
    SqliteConfig {
        url: config.url.clone(),
        pool_size: config.pool_size,
        table_prefix: config.table_prefix.clone(),
        part_size: config.chunk_size_bytes.unwrap_or(defaults.part_size),
    }
}
