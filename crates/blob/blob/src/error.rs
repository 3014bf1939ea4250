use thiserror::Error;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The source stream failed before the write completed.
    ///
    /// Nothing is persisted when this is returned.
    #[error("source stream failed after {offset} bytes: {source}")]
    Transfer {
        /// Bytes accepted from the source before the failure.
        offset: u64,
        /// The error yielded by the source stream.
        #[source]
        source: std::io::Error,
    },

    /// Stored content is incomplete (e.g. a chunk is missing).
    #[error("blob corrupted: {0}")]
    Corrupted(String),

    /// A storage backend error occurred.
    #[error("blob storage error: {0}")]
    Storage(String),
}

impl BlobError {
    /// Convert into an `io::Error` for use inside a byte stream.
    #[must_use]
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Transfer { source, .. } => source,
            other => std::io::Error::other(other),
        }
    }
}
