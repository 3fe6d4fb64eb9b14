//! Fork/exec fallback backend
//!
//! Spawns the helper directly under the user's credentials when no service
//! manager instance is available. Spawned children are tracked in memory per
//! uid; a daemon restart loses that tracking.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{Result, ServiceError};
use super::privileges::run_as;
use super::ServiceBackend;
use crate::accounts::{UserIdentity, UserIdentityResolver};
use crate::config::{Config, HelperConfig};

/// Lookup of running processes by name and effective uid
#[cfg_attr(test, mockall::automock)]
pub trait ProcessTable: Send + Sync {
    /// PIDs of processes named `name`, restricted to effective uid `uid` if given
    fn helper_pids(&self, name: &str, uid: Option<u32>) -> Vec<u32>;
}

/// [`ProcessTable`] reading procfs through sysinfo
#[derive(Debug, Default)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn helper_pids(&self, name: &str, uid: Option<u32>) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_user(UpdateKind::Always),
        );

        system
            .processes()
            .iter()
            .filter(|(_, process)| process.name() == OsStr::new(name))
            .filter(|(_, process)| match uid {
                Some(uid) => process
                    .effective_user_id()
                    .is_some_and(|euid| **euid == uid),
                None => true,
            })
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }
}

/// Everything needed to launch one helper instance
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Target user
    pub identity: UserIdentity,
    /// Supplementary group granting access to the control socket
    pub control_gid: u32,
    /// Session environment of the user
    pub env: Vec<(String, String)>,
}

/// Launches helper processes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HelperSpawner: Send + Sync {
    /// Spawn the helper described by `request`
    async fn spawn(&self, request: &SpawnRequest) -> Result<Child>;
}

/// [`HelperSpawner`] executing the helper binary with dropped privileges
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    binary: PathBuf,
    fork_arg: String,
}

impl TokioSpawner {
    /// Spawner for `binary`, invoked with the single argument `fork_arg`
    pub fn new(binary: impl Into<PathBuf>, fork_arg: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            fork_arg: fork_arg.into(),
        }
    }
}

#[async_trait]
impl HelperSpawner for TokioSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<Child> {
        let identity = &request.identity;
        let mut cmd = Command::new(&self.binary);
        cmd.arg(&self.fork_arg)
            .env_clear()
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            // Identity variables go last so the daemon's own HOME never leaks in
            .env("HOME", &identity.home)
            .env("USER", &identity.username)
            .env("LOGNAME", &identity.username)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        run_as(&mut cmd, identity.uid, identity.gid, &[request.control_gid]);

        let child = cmd.spawn()?;
        info!(
            user = %identity.username,
            uid = identity.uid,
            pid = child.id(),
            "Spawned {}",
            self.binary.display()
        );
        Ok(child)
    }
}

/// Source of a user's session environment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionEnvSource: Send + Sync {
    /// Environment of the user's service manager instance
    async fn session_env(&self, identity: &UserIdentity) -> Result<Vec<(String, String)>>;
}

/// [`SessionEnvSource`] using `systemctl --user show-environment`
#[derive(Debug, Clone)]
pub struct SystemctlSessionEnv {
    systemctl: PathBuf,
    runtime_dir_root: PathBuf,
}

impl SystemctlSessionEnv {
    /// Create a session environment source
    pub fn new(systemctl: impl Into<PathBuf>, runtime_dir_root: impl Into<PathBuf>) -> Self {
        Self {
            systemctl: systemctl.into(),
            runtime_dir_root: runtime_dir_root.into(),
        }
    }
}

#[async_trait]
impl SessionEnvSource for SystemctlSessionEnv {
    async fn session_env(&self, identity: &UserIdentity) -> Result<Vec<(String, String)>> {
        let mut cmd = Command::new(&self.systemctl);
        cmd.args(["--user", "show-environment"])
            .env_clear()
            .env(
                "XDG_RUNTIME_DIR",
                self.runtime_dir_root.join(identity.uid.to_string()),
            )
            .stdin(Stdio::null());
        run_as(&mut cmd, identity.uid, identity.gid, &[identity.gid]);

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(ServiceError::CommandFailed {
                command: format!("{} --user show-environment", self.systemctl.display()),
                status: output.status.to_string(),
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_environment(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `KEY=VALUE` lines, skipping anything else
pub fn parse_environment(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// A user the backend is responsible for
///
/// `child` is `None` after a respawn failed; the next enable or restart
/// retries the spawn and a stop just forgets the entry.
struct TrackedHelper {
    child: Option<Child>,
    identity: UserIdentity,
}

/// Fallback [`ServiceBackend`] spawning the helper directly
pub struct ForkBackend {
    process_name: String,
    control_group: String,
    stop_timeout: Duration,
    stop_all_timeout: Duration,
    identities: Arc<dyn UserIdentityResolver>,
    processes: Arc<dyn ProcessTable>,
    spawner: Arc<dyn HelperSpawner>,
    env_source: Arc<dyn SessionEnvSource>,
    children: Mutex<HashMap<u32, TrackedHelper>>,
}

impl ForkBackend {
    /// Create a backend with explicit collaborators
    pub fn new(
        helper: &HelperConfig,
        identities: Arc<dyn UserIdentityResolver>,
        processes: Arc<dyn ProcessTable>,
        spawner: Arc<dyn HelperSpawner>,
        env_source: Arc<dyn SessionEnvSource>,
    ) -> Self {
        Self {
            process_name: helper.process_name.clone(),
            control_group: helper.control_group.clone(),
            stop_timeout: Duration::from_secs(helper.stop_timeout_secs),
            stop_all_timeout: Duration::from_secs(helper.stop_all_timeout_secs),
            identities,
            processes,
            spawner,
            env_source,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Create a backend using the system process table and spawner
    pub fn from_config(config: &Config, identities: Arc<dyn UserIdentityResolver>) -> Self {
        Self::new(
            &config.helper,
            identities,
            Arc::new(SysinfoProcessTable),
            Arc::new(TokioSpawner::new(
                &config.helper.binary_path,
                &config.helper.fork_arg,
            )),
            Arc::new(SystemctlSessionEnv::new(
                &config.systemd.systemctl_path,
                &config.systemd.runtime_dir_root,
            )),
        )
    }

    /// Whether a child is tracked for `uid`
    pub async fn is_tracked(&self, uid: u32) -> bool {
        self.children.lock().await.contains_key(&uid)
    }

    /// PID of the tracked child for `uid`
    pub async fn tracked_pid(&self, uid: u32) -> Option<u32> {
        self.children
            .lock()
            .await
            .get(&uid)
            .and_then(|tracked| tracked.child.as_ref())
            .and_then(|child| child.id())
    }

    async fn spawn_for(&self, identity: &UserIdentity) -> Result<Child> {
        let control_gid = self.identities.group_id(&self.control_group)?;

        let env = match self.env_source.session_env(identity).await {
            Ok(env) => env,
            Err(e) => {
                warn!(
                    user = %identity.username,
                    "Failed to retrieve user session environment: {}",
                    e
                );
                Vec::new()
            }
        };

        let request = SpawnRequest {
            identity: identity.clone(),
            control_gid,
            env,
        };
        self.spawner.spawn(&request).await
    }

    /// SIGTERM every helper process on the system, then wait for tracked ones
    pub async fn stop_all(&self) {
        for pid in self.processes.helper_pids(&self.process_name, None) {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, "Failed to send SIGTERM to helper: {}", e);
            }
        }

        let tracked: Vec<TrackedHelper> = self
            .children
            .lock()
            .await
            .drain()
            .map(|(_, tracked)| tracked)
            .collect();

        let waits = tracked
            .into_iter()
            .filter_map(|tracked| tracked.child)
            .map(|mut child| async move {
                let _ = child.wait().await;
            });
        if tokio::time::timeout(self.stop_all_timeout, futures::future::join_all(waits))
            .await
            .is_err()
        {
            warn!("Timed out waiting for helpers to exit");
        }
    }
}

#[async_trait]
impl ServiceBackend for ForkBackend {
    async fn enable(&self, identity: &UserIdentity) -> Result<()> {
        let mut children = self.children.lock().await;

        let respawn = children
            .get(&identity.uid)
            .is_some_and(|tracked| tracked.child.is_none());
        if !respawn {
            let running = self
                .processes
                .helper_pids(&self.process_name, Some(identity.uid));
            if !running.is_empty() {
                debug!(uid = identity.uid, ?running, "Helper already running");
                return Ok(());
            }
        }

        let child = self.spawn_for(identity).await?;
        children.insert(
            identity.uid,
            TrackedHelper {
                child: Some(child),
                identity: identity.clone(),
            },
        );
        Ok(())
    }

    async fn stop(&self, uid: u32) -> Result<()> {
        let mut children = self.children.lock().await;
        let mut tracked = children.remove(&uid).ok_or(ServiceError::NotStarted(uid))?;

        let Some(child) = tracked.child.as_mut() else {
            debug!(uid, "Helper was not running after a failed respawn");
            return Ok(());
        };
        if let Err(e) = terminate(child, self.stop_timeout).await {
            children.insert(uid, tracked);
            return Err(e);
        }

        info!(uid, "Stopped helper");
        Ok(())
    }

    async fn disable(&self, uid: u32) -> Result<()> {
        self.stop(uid).await
    }

    async fn restart(&self, uid: u32) -> Result<()> {
        let mut children = self.children.lock().await;
        let mut tracked = children.remove(&uid).ok_or(ServiceError::NotStarted(uid))?;

        if let Some(child) = tracked.child.as_mut() {
            if let Err(e) = terminate(child, self.stop_timeout).await {
                children.insert(uid, tracked);
                return Err(e);
            }
        }

        match self.spawn_for(&tracked.identity).await {
            Ok(child) => {
                info!(uid, pid = child.id(), "Restarted helper");
                tracked.child = Some(child);
                children.insert(uid, tracked);
                Ok(())
            }
            Err(e) => {
                tracked.child = None;
                children.insert(uid, tracked);
                Err(e)
            }
        }
    }
}

/// SIGTERM `child` and wait for it, killing it after `timeout`
async fn terminate(child: &mut Child, timeout: Duration) -> Result<()> {
    // id() is None once the child has been reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(ServiceError::Signal(e)),
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status?;
            debug!(pid, "Helper exited: {:?}", status);
        }
        Err(_) => {
            warn!(pid, "Helper ignored SIGTERM for {:?}, killing", timeout);
            child.kill().await?;
        }
    }

    Ok(())
}
