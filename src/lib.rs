//! # norduser-monitor
//!
//! Keeps one per-user helper process (`norduserd`) running for every member
//! of the privileged group who is logged in, and stops it when they log out
//! or leave the group.
//!
//! # Architecture
//!
//! ```text
//! norduser-monitor
//!   ├─> Accounts (group file, utmp sessions, passwd identities)
//!   ├─> Reconciliation Monitor (per-user state machine, file watches)
//!   ├─> Service Backends
//!   │     ├─> systemd user unit (primary)
//!   │     ├─> direct fork with dropped credentials (fallback)
//!   │     └─> helper RPC (sandboxed)
//!   └─> Helper Supervisor (unix socket RPC, startup codes)
//! ```
//!
//! # Data Flow
//!
//! **Native:** inotify → Monitor → transition → Combined backend → systemd | fork
//!
//! **Sandboxed:** inotify (group only) → Sandboxed monitor → RPC stop

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Monitor configuration
pub mod config;

/// Group, session and identity sources
pub mod accounts;

/// Reconciliation loop and state machine
pub mod monitor;

/// Helper start/stop backends
pub mod service;

/// Helper RPC and process supervision
pub mod supervisor;

/// Native vs sandboxed packaging
pub mod deployment;

/// Startup diagnostics and user-facing error formatting
pub mod diagnostics;
