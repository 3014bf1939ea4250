use std::time::Duration;

use serde::Deserialize;

/// Attachment upload and maintenance configuration.
#[derive(Debug, Deserialize)]
pub struct AttachmentsConfig {
    /// Largest accepted upload in bytes. `0` disables the limit.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Seconds between orphan sweeps. `0` disables the background sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Minimum age in seconds of an unreferenced blob before it is swept.
    #[serde(default = "default_sweep_grace")]
    pub sweep_grace_seconds: u64,
}

impl AttachmentsConfig {
    /// The sweep period, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }

    /// Grace period protecting freshly written blobs from the sweep.
    pub fn sweep_grace(&self) -> Duration {
        Duration::from_secs(self.sweep_grace_seconds)
    }
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            sweep_interval_seconds: default_sweep_interval(),
            sweep_grace_seconds: default_sweep_grace(),
        }
    }
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_sweep_grace() -> u64 {
    3600
}
