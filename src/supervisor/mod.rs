//! Helper process supervision over local RPC
//!
//! The helper listens on a per-uid Unix socket. [`HelperClient`] speaks the
//! RPC; [`HelperProcessManager`] adds spawning and implements
//! [`ChildProcessSupervisor`], the interface used by the sandboxed backend.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

pub mod client;
pub mod error;
pub mod protocol;

pub use client::HelperClient;
pub use error::{Result, SupervisorError};
pub use protocol::{HelperRequest, HelperResponse, SocketLayout};

use crate::config::Config;

/// Helper reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Answering on its socket
    Running,
    /// Socket exists but belongs to another user
    RunningForOtherUser,
    /// Not reachable
    NotRunning,
}

/// Exit codes a helper uses to report why it refused to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupCode {
    /// An instance for this user already runs
    AlreadyRunning,
    /// An instance for another user holds the socket
    AlreadyRunningForOtherUser,
    /// Socket could not be created
    FailedToCreateUnixSocket,
    /// Invoking user is not in the privileged group
    UserNotInGroup,
    /// Generic startup failure
    FailedToEnable,
}

impl StartupCode {
    /// Map a process exit code
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::AlreadyRunning),
            2 => Some(Self::AlreadyRunningForOtherUser),
            3 => Some(Self::FailedToCreateUnixSocket),
            4 => Some(Self::UserNotInGroup),
            5 => Some(Self::FailedToEnable),
            _ => None,
        }
    }
}

impl std::fmt::Display for StartupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already running"),
            Self::AlreadyRunningForOtherUser => write!(f, "already running for other user"),
            Self::FailedToCreateUnixSocket => write!(f, "failed to create unix socket"),
            Self::UserNotInGroup => write!(f, "user not in group"),
            Self::FailedToEnable => write!(f, "failed to enable"),
        }
    }
}

/// Owner of one helper process, reachable over RPC
#[async_trait]
pub trait ChildProcessSupervisor: Send + Sync {
    /// Spawn the helper and wait until it answers
    async fn start(&self) -> Result<()>;

    /// Ask the helper to exit
    async fn stop(&self, disable: bool) -> Result<()>;

    /// Ask the helper to restart
    async fn restart(&self) -> Result<()>;

    /// Liveness check
    async fn ping(&self) -> Result<()>;

    /// Reachability of the helper
    async fn process_status(&self) -> ProcessStatus;
}

/// Hands out a supervisor per uid
pub trait SupervisorProvider: Send + Sync {
    /// Supervisor for the helper of `uid`
    fn supervisor(&self, uid: u32) -> Arc<dyn ChildProcessSupervisor>;
}

/// [`ChildProcessSupervisor`] that execs the helper binary
#[derive(Debug, Clone)]
pub struct HelperProcessManager {
    client: HelperClient,
    binary: PathBuf,
    args: Vec<String>,
    startup_timeout: Duration,
}

impl HelperProcessManager {
    /// Manager for the helper at `binary`, reachable through `client`
    pub fn new(
        client: HelperClient,
        binary: impl Into<PathBuf>,
        args: Vec<String>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            client,
            binary: binary.into(),
            args,
            startup_timeout,
        }
    }
}

#[async_trait]
impl ChildProcessSupervisor for HelperProcessManager {
    async fn start(&self) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()?;
        debug!(pid = child.id(), "Spawned {}", self.binary.display());

        let outcome = tokio::time::timeout(self.startup_timeout, async {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => Err(match status.code().and_then(StartupCode::from_exit_code) {
                        Some(code) => SupervisorError::Startup(code),
                        None => SupervisorError::ExitedEarly(status.to_string()),
                    }),
                    Err(e) => Err(SupervisorError::Io(e)),
                },
                pinged = self.client.ping(true) => pinged,
            }
        })
        .await
        .map_err(|_| SupervisorError::Timeout)?;

        if outcome.is_ok() {
            info!(socket = %self.client.socket().display(), "Helper is up");
            // Reap the helper whenever it exits
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        outcome
    }

    async fn stop(&self, disable: bool) -> Result<()> {
        self.client.stop(disable).await
    }

    async fn restart(&self) -> Result<()> {
        self.client.restart().await
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping(false).await
    }

    async fn process_status(&self) -> ProcessStatus {
        self.client.process_status().await
    }
}

/// [`SupervisorProvider`] building RPC supervisors from the socket layout
#[derive(Debug, Clone)]
pub struct RpcSupervisorProvider {
    layout: SocketLayout,
    binary: PathBuf,
    ping_timeout: Duration,
    startup_timeout: Duration,
}

impl RpcSupervisorProvider {
    /// Provider from configuration
    pub fn from_config(config: &Config, sandboxed: bool) -> Self {
        Self {
            layout: SocketLayout::from_config(config, sandboxed),
            binary: config.helper.binary_path.clone(),
            ping_timeout: Duration::from_secs(config.rpc.ping_timeout_secs),
            startup_timeout: Duration::from_secs(config.rpc.startup_timeout_secs),
        }
    }
}

impl SupervisorProvider for RpcSupervisorProvider {
    fn supervisor(&self, uid: u32) -> Arc<dyn ChildProcessSupervisor> {
        let client = HelperClient::new(self.layout.socket_path(uid), self.ping_timeout);
        Arc::new(HelperProcessManager::new(
            client,
            &self.binary,
            Vec::new(),
            self.startup_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::client::tests::fake_helper;
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    fn manager(dir: &TempDir, script: &str) -> HelperProcessManager {
        let client = HelperClient::new(dir.path().join("helper.sock"), Duration::from_secs(2));
        HelperProcessManager::new(
            client,
            "/bin/sh",
            vec!["-c".to_string(), script.to_string()],
            Duration::from_secs(3),
        )
    }

    #[test]
    fn test_startup_codes() {
        assert_eq!(StartupCode::from_exit_code(1), Some(StartupCode::AlreadyRunning));
        assert_eq!(StartupCode::from_exit_code(4), Some(StartupCode::UserNotInGroup));
        assert_eq!(StartupCode::from_exit_code(0), None);
        assert_eq!(StartupCode::from_exit_code(42), None);
    }

    #[tokio::test]
    async fn test_start_reports_already_running() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "exit 1");

        assert!(matches!(
            manager.start().await,
            Err(SupervisorError::Startup(StartupCode::AlreadyRunning))
        ));
    }

    #[tokio::test]
    async fn test_start_unknown_exit() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "exit 42");

        assert!(matches!(
            manager.start().await,
            Err(SupervisorError::ExitedEarly(_))
        ));
    }

    #[tokio::test]
    async fn test_start_succeeds_once_helper_answers() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "sleep 2");
        let listener = UnixListener::bind(dir.path().join("helper.sock")).unwrap();
        fake_helper(listener, HelperResponse::ok());

        manager.start().await.unwrap();
        assert_eq!(manager.process_status().await, ProcessStatus::Running);
    }
}
