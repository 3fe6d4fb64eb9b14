//! Monitor Error Types

use thiserror::Error;

use crate::accounts::AccountsError;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    /// File watcher could not be created or registered
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Event source stopped delivering events
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    /// Group or session source could not be read
    #[error("Reconciliation pass failed: {0}")]
    Accounts(#[from] AccountsError),
}
