pub mod builder;
pub mod error;
pub mod pipe;
pub mod service;
pub mod testing;
pub mod types;

pub use builder::AttachmentServiceBuilder;
pub use error::AttachmentError;
pub use pipe::{LimitExceeded, TransferFailed, TransferPipe};
pub use service::AttachmentService;
pub use types::{AttachReceipt, DeleteReceipt, Download, SweepReport, Upload};
