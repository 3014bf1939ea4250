mod blobs;
mod config;
mod migrations;
mod pool;
mod records;

pub use blobs::SqliteBlobStore;
pub use config::SqliteConfig;
pub use migrations::run_migrations;
pub use pool::connect;
pub use records::SqliteRecordStore;
