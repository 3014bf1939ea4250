pub mod record;
pub mod types;

pub use record::{AttachmentRef, IV_LEN, Record, RecordFields, generate_iv, now};
pub use types::{BlobId, InvalidRecordId, RecordId};
