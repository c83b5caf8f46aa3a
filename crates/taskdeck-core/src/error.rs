use thiserror::Error;

/// Convenience alias used across all Taskdeck crates.
pub type TaskdeckResult<T> = Result<T, TaskdeckError>;

/// Error taxonomy for the orchestration subsystem.
///
/// Run-time failures are absorbed at the task level (evidence + requeue +
/// cooldown); nothing here is allowed to halt the host process.
#[derive(Error, Debug)]
pub enum TaskdeckError {
    /// The gateway rejected or failed a send. The message is surfaced in the
    /// task's evidence trail and drives rate-limit classification.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A persisted document could not be read or parsed.
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid or unusable configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure before any gateway response arrived.
    #[error("HTTP error: {0}")]
    Http(String),
}
