use std::path::PathBuf;

use thiserror::Error;

/// Failures a save operation can surface to its caller.
///
/// Structured-store failures are deliberately absent: they are logged and
/// answered with the file fallback, so they never reach this type on their own.
#[derive(Debug, Error)]
pub enum PersistError {
    /// No structured store was configured for this process.
    #[error("structured record store is not available")]
    BackendUnavailable,

    /// Neither a dive payload nor a dive report file exists.
    #[error("no dive data available")]
    NoDataAvailable,

    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write report to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
