//! Service Backend Error Types

use thiserror::Error;

use crate::accounts::AccountsError;
use crate::supervisor::SupervisorError;

/// Result type for service backend operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service backend error types
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No helper handle tracked for this uid
    #[error("Helper was not started for uid {0}")]
    NotStarted(u32),

    /// User-scope service manager has no session bus to talk to
    #[error("No session bus for uid {0}")]
    NoSessionBus(u32),

    /// External command exited unsuccessfully
    #[error("{command} failed ({status}): {output}")]
    CommandFailed {
        /// Command line that was run
        command: String,
        /// Exit status description
        status: String,
        /// Combined stdout and stderr
        output: String,
    },

    /// Process could not be spawned or waited on
    #[error("Process error: {0}")]
    Spawn(#[from] std::io::Error),

    /// Signal delivery failed
    #[error("Failed to signal helper: {0}")]
    Signal(#[from] nix::Error),

    /// Helper RPC failed
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Identity or group lookup failed
    #[error(transparent)]
    Accounts(#[from] AccountsError),
}
