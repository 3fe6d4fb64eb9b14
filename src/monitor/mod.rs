//! Helper lifecycle monitoring
//!
//! - [`state`] - the per-user transition table
//! - [`reconcile`] - the full monitor for native installs
//! - [`sandboxed`] - the reduced monitor and logout waiter for the sandbox
//! - [`watcher`] - file change plumbing shared by both

pub mod error;
pub mod reconcile;
pub mod sandboxed;
pub mod state;
pub mod watcher;

pub use error::{MonitorError, Result};
pub use reconcile::{MonitorPhase, MonitorSettings, ReconciliationMonitor};
pub use sandboxed::{wait_for_logout, LogoutWaiter, SandboxedMonitor};
pub use state::{transition, transition_signal, Action, NorduserState};
pub use watcher::{classify_event, watch_paths, Change, WatchEvents};
