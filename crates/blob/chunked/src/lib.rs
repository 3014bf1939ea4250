mod config;
mod store;

pub use config::{ChunkedConfig, DEFAULT_CHUNK_SIZE};
pub use store::ChunkedBlobStore;
