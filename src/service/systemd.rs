//! Service manager backend
//!
//! Drives the helper unit through `systemctl`. Root gets the system instance;
//! everyone else gets their user instance, which is only reachable through
//! that user's session bus.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use nix::unistd::{Uid, User};
use tokio::process::Command;
use tracing::{debug, info};

use super::error::{Result, ServiceError};
use super::privileges::run_as;
use super::ServiceBackend;
use crate::accounts::{AccountsError, UserIdentity};
use crate::config::Config;

/// Primary [`ServiceBackend`] using systemd units
#[derive(Debug, Clone)]
pub struct SystemdBackend {
    systemctl: PathBuf,
    unit: String,
    runtime_dir_root: PathBuf,
}

impl SystemdBackend {
    /// Create a backend for `unit`
    pub fn new(
        systemctl: impl Into<PathBuf>,
        unit: impl Into<String>,
        runtime_dir_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            systemctl: systemctl.into(),
            unit: unit.into(),
            runtime_dir_root: runtime_dir_root.into(),
        }
    }

    /// Create a backend from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.systemd.systemctl_path,
            &config.helper.unit_name,
            &config.systemd.runtime_dir_root,
        )
    }

    fn runtime_dir(&self, uid: u32) -> PathBuf {
        self.runtime_dir_root.join(uid.to_string())
    }

    /// Session bus socket of `uid`
    pub fn session_bus_path(&self, uid: u32) -> PathBuf {
        self.runtime_dir(uid).join("bus")
    }

    async fn run(&self, uid: u32, verb: &str) -> Result<()> {
        let args = systemctl_args(uid, verb, &self.unit);
        let mut cmd = Command::new(&self.systemctl);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if uid != 0 {
            let bus = self.session_bus_path(uid);
            if !bus.exists() {
                return Err(ServiceError::NoSessionBus(uid));
            }

            let gid = primary_gid(uid)?;
            cmd.env("XDG_RUNTIME_DIR", self.runtime_dir(uid))
                .env("DBUS_SESSION_BUS_ADDRESS", bus_address(&bus));
            run_as(&mut cmd, uid, gid, &[gid]);
        }

        let command = format!("{} {}", self.systemctl.display(), args.join(" "));
        debug!(uid, "Running {}", command);

        let output = cmd.output().await?;
        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ServiceError::CommandFailed {
                command,
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ServiceBackend for SystemdBackend {
    async fn enable(&self, identity: &UserIdentity) -> Result<()> {
        self.run(identity.uid, "enable").await?;
        info!(uid = identity.uid, "Enabled {} via systemd", self.unit);
        Ok(())
    }

    async fn stop(&self, uid: u32) -> Result<()> {
        self.run(uid, "stop").await
    }

    async fn disable(&self, uid: u32) -> Result<()> {
        self.run(uid, "disable").await
    }

    async fn restart(&self, uid: u32) -> Result<()> {
        self.run(uid, "restart").await
    }
}

/// `systemctl` arguments for `verb` on `unit` in the scope of `uid`
pub fn systemctl_args(uid: u32, verb: &str, unit: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(4);
    if uid != 0 {
        args.push("--user".to_string());
    }
    args.push("--now".to_string());
    args.push(verb.to_string());
    args.push(unit.to_string());
    args
}

fn bus_address(bus: &Path) -> String {
    format!("unix:path={}", bus.display())
}

fn primary_gid(uid: u32) -> Result<u32> {
    let user = User::from_uid(Uid::from_raw(uid))
        .map_err(AccountsError::from)?
        .ok_or_else(|| AccountsError::UserNotFound(uid.to_string()))?;
    Ok(user.gid.as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_args_system_scope() {
        assert_eq!(
            systemctl_args(0, "enable", "norduserd.service"),
            vec!["--now", "enable", "norduserd.service"]
        );
    }

    #[test]
    fn test_args_user_scope() {
        assert_eq!(
            systemctl_args(1000, "disable", "norduserd.service"),
            vec!["--user", "--now", "disable", "norduserd.service"]
        );
    }

    #[test]
    fn test_bus_address() {
        let backend = SystemdBackend::new("systemctl", "norduserd.service", "/run/user");
        assert_eq!(
            bus_address(&backend.session_bus_path(1000)),
            "unix:path=/run/user/1000/bus"
        );
    }

    #[tokio::test]
    async fn test_missing_session_bus() {
        let runtime = TempDir::new().unwrap();
        let backend = SystemdBackend::new("/bin/true", "norduserd.service", runtime.path());

        let err = backend.stop(4242).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoSessionBus(4242)));
    }

    #[tokio::test]
    async fn test_system_scope_success() {
        let backend = SystemdBackend::new("/bin/true", "norduserd.service", "/run/user");
        assert!(backend.disable(0).await.is_ok());
    }

    #[tokio::test]
    async fn test_command_failure_carries_output() {
        let backend = SystemdBackend::new("/bin/false", "norduserd.service", "/run/user");

        match backend.stop(0).await {
            Err(ServiceError::CommandFailed { command, .. }) => {
                assert!(command.ends_with("--now stop norduserd.service"));
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }
}
