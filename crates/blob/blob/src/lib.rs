pub mod error;
pub mod store;
pub mod stream;
pub mod testing;
pub mod types;

pub use error::BlobError;
pub use store::BlobStore;
pub use stream::{ByteStream, collect, from_bytes, from_chunks};
pub use types::{BlobDownload, BlobMetadata, Checksum};
