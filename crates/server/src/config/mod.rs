mod attachments;
mod logging;
mod server;
mod storage;


pub use attachments::*;
pub use logging::*;
pub use server::*;
pub use storage::*;

use serde::Deserialize;

/// Top-level configuration for the Coffer server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct CofferConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Record and blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload limits and orphan sweeping.
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    /// Log output configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}
