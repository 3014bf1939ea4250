/// Default size of a stored content part: 256 KiB.
pub const DEFAULT_PART_SIZE: usize = 256 * 1024;

/// Configuration for the `SQLite` record and blob stores.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// `SQLite` connection URL (e.g. `sqlite://coffer.db` or `sqlite::memory:`).
    pub url: String,

    /// Maximum number of connections in the `sqlx` connection pool.
    ///
    /// Ignored for in-memory databases, which always use a single connection.
    pub pool_size: u32,

    /// Prefix applied to table names to avoid collisions (e.g. `"coffer_"`).
    pub table_prefix: String,

    /// Size in bytes of each stored content part.
    pub part_size: usize,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: String::from("sqlite://coffer.db"),
            pool_size: 5,
            table_prefix: String::from("coffer_"),
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl SqliteConfig {
    /// Configuration for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: String::from("sqlite::memory:"),
            ..Self::default()
        }
    }

    /// Whether the URL names an in-memory database.
    pub(crate) fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Return the records table name (`prefix_records`).
    pub(crate) fn records_table(&self) -> String {
        format!("{}records", self.table_prefix)
    }

    /// Return the blob descriptor table name (`prefix_blobs`).
    pub(crate) fn blobs_table(&self) -> String {
        format!("{}blobs", self.table_prefix)
    }

    /// Return the blob content table name (`prefix_blob_parts`).
    pub(crate) fn blob_parts_table(&self) -> String {
        format!("{}blob_parts", self.table_prefix)
    }

    /// Return the part size, clamped to at least one byte.
    pub(crate) fn effective_part_size(&self) -> usize {
        self.part_size.max(1)
    }
}
