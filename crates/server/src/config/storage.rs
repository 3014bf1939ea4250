use serde::Deserialize;

/// Storage backend configuration.
///
/// The `chunked` backend keeps records and chunked blobs in process memory.
/// The `sqlite` backend persists both to one database through a shared pool.
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use: `"chunked"` or `"sqlite"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Database URL for the `sqlite` backend.
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum number of pooled database connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Prefix applied to database table names.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// Size of stored content chunks. Each backend picks its own default
    /// when unset.
    pub chunk_size_bytes: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_url(),
            pool_size: default_pool_size(),
            table_prefix: default_table_prefix(),
            chunk_size_bytes: None,
        }
    }
}

fn default_backend() -> String {
    "chunked".to_owned()
}

fn default_url() -> String {
    "sqlite://coffer.db".to_owned()
}

fn default_pool_size() -> u32 {
    5
}

fn default_table_prefix() -> String {
    "coffer_".to_owned()
}
