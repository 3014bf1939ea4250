use serde::Deserialize;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
///
/// Filtering is controlled by `RUST_LOG` and defaults to `info`.
#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Output format of log events.
    #[serde(default)]
    pub format: LogFormat,
}
