//! Unified error handling for the daemon.

/// Daemon error type, wrapping engine, notifier, and io failures.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("engine error: {0}")]
    Engine(#[from] stash_engine::Error),

    #[error("filesystem notifier error: {0}")]
    Notify(#[from] notify::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("status file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("invalid pid file contents: '{0}'")]
    InvalidPid(String),

    #[error("pid file missing")]
    PidFileMissing,
}

impl DaemonError {
    /// Exit code for callers that shell out, matching the engine contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Engine(e) => e.exit_code(),
            _ => 1,
        }
    }
}

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
