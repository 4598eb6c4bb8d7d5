use thiserror::Error;

/// Top-level error type for signalforge.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("source '{source_name}' failed: {message}")]
    SourceFailed { source_name: String, message: String },

    #[error("all {0} configured sources failed")]
    AllSourcesFailed(usize),

    #[error("report error: {0}")]
    ReportError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
