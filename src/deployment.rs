//! Deployment Detection
//!
//! Detects whether the daemon runs from a native package or from inside the
//! snap sandbox. The sandbox forbids spawning helpers for other users, so it
//! gets the reduced monitor.

use tracing::{debug, info};

/// Environment variable set for every snap application
pub const SNAP_NAME_VAR: &str = "SNAP_NAME";

/// Packaging the daemon runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentContext {
    /// Native system package (full access)
    Native,
    /// Snap confinement
    Snap,
}

impl DeploymentContext {
    /// Whether helpers are managed over RPC only
    pub fn is_sandboxed(self) -> bool {
        self == Self::Snap
    }
}

impl std::fmt::Display for DeploymentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "Native Package"),
            Self::Snap => write!(f, "Snap"),
        }
    }
}

/// Detect deployment context from the process environment
pub fn detect_deployment_context() -> DeploymentContext {
    let context = context_from_snap_name(std::env::var(SNAP_NAME_VAR).ok().as_deref());
    match context {
        DeploymentContext::Snap => info!("Detected snap deployment"),
        DeploymentContext::Native => debug!("Detected native package deployment"),
    }
    context
}

fn context_from_snap_name(snap_name: Option<&str>) -> DeploymentContext {
    match snap_name {
        Some(name) if !name.is_empty() => DeploymentContext::Snap,
        _ => DeploymentContext::Native,
    }
}
