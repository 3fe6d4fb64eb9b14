//! Supervisor Error Types

use std::path::PathBuf;
use thiserror::Error;

use super::StartupCode;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Supervisor and helper RPC error types
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Could not connect to the helper socket
    #[error("Failed to connect to helper at {path:?}: {source}")]
    Connect {
        /// Socket path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Helper sent something that is not a response
    #[error("Helper protocol error: {0}")]
    Protocol(String),

    /// Helper answered with an error
    #[error("Helper rejected request: {0}")]
    Rejected(String),

    /// Helper exited during startup with a known code
    #[error("Helper failed to start: {0}")]
    Startup(StartupCode),

    /// Helper exited during startup with an unknown status
    #[error("Helper exited during startup ({0})")]
    ExitedEarly(String),

    /// Helper did not answer in time
    #[error("Timed out waiting for helper")]
    Timeout,

    /// I/O error on an established connection or spawn
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SupervisorError {
    /// Whether the helper socket refused us for lack of permission
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            SupervisorError::Connect { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied
        )
    }
}
