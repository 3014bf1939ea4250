pub mod error;
pub mod store;
pub mod testing;

pub use error::RecordError;
pub use store::{AttachmentUpdate, RecordStore};
