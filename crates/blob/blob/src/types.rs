use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use coffer_core::BlobId;

use crate::stream::ByteStream;

/// Metadata for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Unique blob identifier.
    pub id: BlobId,
    /// Original filename.
    pub filename: String,
    /// MIME content type (e.g. `"application/pdf"`).
    pub content_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// `SHA-256` hex digest of the blob content.
    pub checksum_sha256: String,
    /// When the blob was written.
    pub created_at: DateTime<Utc>,
}

impl BlobMetadata {
    /// Listing order: creation time, then id.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// A readable blob: metadata plus a lazily-read content stream.
pub struct BlobDownload {
    /// Blob metadata.
    pub metadata: BlobMetadata,
    /// Content, produced chunk by chunk as the consumer polls.
    pub stream: ByteStream<'static>,
}

impl fmt::Debug for BlobDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobDownload")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Incremental size and `SHA-256` accumulator for content written in pieces.
#[derive(Default)]
pub struct Checksum {
    hasher: Sha256,
    len: u64,
}

impl Checksum {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of content.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been fed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume the accumulator, returning the total size and hex digest.
    #[must_use]
    pub fn finish(self) -> (u64, String) {
        (self.len, hex::encode(self.hasher.finalize()))
    }
}
