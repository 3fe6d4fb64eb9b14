//! Account Lookup Error Types
//!
//! Errors raised while reading the group database, the session
//! accounting table and the passwd database.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for account lookups
pub type Result<T> = std::result::Result<T, AccountsError>;

/// Accounts module error types
#[derive(Error, Debug)]
pub enum AccountsError {
    /// No line for the group exists in the group database
    #[error("Group not found: {0}")]
    NotFound(String),

    /// Username no longer resolves (account deleted or renamed)
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Group database could not be read
    #[error("Failed to read group file {path:?}: {source}")]
    GroupRead {
        /// Path of the group file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Session accounting table could not be enumerated
    #[error("Session accounting error: {0}")]
    SessionTable(String),

    /// passwd/group database lookup failed
    #[error("Identity lookup failed: {0}")]
    Lookup(#[from] nix::Error),
}
