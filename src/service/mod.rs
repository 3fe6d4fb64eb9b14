//! Per-user helper service backends
//!
//! Three strategies start and stop the helper for a uid:
//!
//! - [`SystemdBackend`] - service manager units (primary)
//! - [`ForkBackend`] - direct spawn with dropped privileges (fallback)
//! - [`SandboxedBackend`] - RPC to a helper the sandbox already started
//!
//! [`CombinedBackend`] pairs the first two and records which one owns each
//! running helper.

use async_trait::async_trait;

use crate::accounts::UserIdentity;

pub mod combined;
pub mod error;
pub mod fork;
mod privileges;
pub mod sandboxed;
pub mod systemd;

pub use combined::CombinedBackend;
pub use error::{Result, ServiceError};
pub use fork::{
    ForkBackend, HelperSpawner, ProcessTable, SessionEnvSource, SpawnRequest, SysinfoProcessTable,
    SystemctlSessionEnv, TokioSpawner,
};
pub use sandboxed::SandboxedBackend;
pub use systemd::SystemdBackend;

/// Backend that owns a running helper instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Service manager based
    Primary,
    /// Direct fork/exec
    Fallback,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "systemd"),
            Self::Fallback => write!(f, "fork"),
        }
    }
}

/// Start/stop strategy for the per-user helper
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Start the helper for `identity`
    async fn enable(&self, identity: &UserIdentity) -> Result<()>;

    /// Stop the helper for `uid`
    async fn stop(&self, uid: u32) -> Result<()>;

    /// Stop the helper for `uid` and keep it from autostarting
    async fn disable(&self, uid: u32) -> Result<()>;

    /// Restart the helper for `uid`
    async fn restart(&self, uid: u32) -> Result<()>;
}
