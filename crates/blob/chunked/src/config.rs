/// Default chunk size: 255 KiB, so a chunk plus its descriptor stays under
/// a 256 KiB document.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Configuration for the chunked blob store.
#[derive(Debug, Clone)]
pub struct ChunkedConfig {
    /// Size in bytes of every chunk except the last one of a blob.
    pub chunk_size: usize,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkedConfig {
    /// Return the chunk size, clamped to at least one byte.
    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = ChunkedConfig::default();
        assert_eq!(cfg.chunk_size, 261_120);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let cfg = ChunkedConfig { chunk_size: 0 };
        assert_eq!(cfg.effective_chunk_size(), 1);
    }
}
