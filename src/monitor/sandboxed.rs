//! Reduced monitor for the sandboxed packaging
//!
//! Inside the sandbox helpers are started by the CLI, not by this process,
//! and logins cannot be classified. What remains is stopping the helper of
//! anyone removed from the group, and letting a caller wait for a user's
//! logout.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::error::{MonitorError, Result};
use super::watcher::{is_group_event, is_session_event, watch_dir_for, watch_paths, WatchEvents};
use crate::accounts::{GroupMembers, GroupReader, SessionReader, UserIdentityResolver};
use crate::service::ServiceBackend;

/// Group watcher that stops helpers of removed members
pub struct SandboxedMonitor {
    group_name: String,
    group_file: PathBuf,
    groups: Arc<dyn GroupReader>,
    identities: Arc<dyn UserIdentityResolver>,
    backend: Arc<dyn ServiceBackend>,
    tracked: GroupMembers,
}

impl SandboxedMonitor {
    /// Create a monitor for `group_name` in `group_file`
    pub fn new(
        group_name: impl Into<String>,
        group_file: impl Into<PathBuf>,
        groups: Arc<dyn GroupReader>,
        identities: Arc<dyn UserIdentityResolver>,
        backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            group_file: group_file.into(),
            groups,
            identities,
            backend,
            tracked: GroupMembers::new(),
        }
    }

    /// Usernames whose helper may still be running
    pub fn tracked(&self) -> &GroupMembers {
        &self.tracked
    }

    /// Stop the helper of every user in `previous` but not in `current`.
    ///
    /// Returns `previous` minus the users that were stopped successfully, so
    /// failed stops are retried on the next change.
    pub async fn stop_for_removed_members(
        &self,
        previous: &GroupMembers,
        current: &GroupMembers,
    ) -> GroupMembers {
        let mut remaining = previous.clone();

        for username in previous.difference(current) {
            let identity = match self.identities.resolve(username) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(user = %username, "Failed to resolve removed member: {}", e);
                    continue;
                }
            };
            match self.backend.stop(identity.uid).await {
                Ok(()) => {
                    info!(user = %username, uid = identity.uid, "Stopped helper of removed member");
                    remaining.remove(username);
                }
                Err(e) => warn!(user = %username, uid = identity.uid, "Failed to stop helper: {}", e),
            }
        }

        remaining
    }

    async fn handle_group_change(&mut self) {
        let current = match self.groups.members(&self.group_name) {
            Ok(current) => current,
            Err(e) => {
                error!("Failed to read group members: {}", e);
                return;
            }
        };
        let remaining = self.stop_for_removed_members(&self.tracked, &current).await;
        self.tracked = remaining.union(&current).cloned().collect();
    }

    /// Snapshot the group, then react to every group change from `events`
    pub async fn run_with_events(&mut self, mut events: WatchEvents) -> Result<()> {
        match self.groups.members(&self.group_name) {
            Ok(members) => self.tracked = members,
            Err(e) => error!("Failed to read initial group members: {}", e),
        }
        info!(members = self.tracked.len(), "Watching group membership");

        loop {
            match events.recv().await {
                Some(Ok(event)) => {
                    if is_group_event(&event, &self.group_file) {
                        self.handle_group_change().await;
                    }
                }
                Some(Err(e)) => error!("File watch error: {}", e),
                None => return Err(MonitorError::ChannelClosed("group watcher")),
            }
        }
    }

    /// Watch the group directory, then run
    pub async fn run(&mut self) -> Result<()> {
        let (_watcher, events) = watch_paths(&[watch_dir_for(&self.group_file)])?;
        self.run_with_events(events).await
    }
}

/// Waits until one user has no active session
pub struct LogoutWaiter {
    username: String,
    utmp_file: PathBuf,
    sessions: Arc<dyn SessionReader>,
}

impl LogoutWaiter {
    /// Waiter for `username` on the session table at `utmp_file`
    pub fn new(
        username: impl Into<String>,
        utmp_file: impl Into<PathBuf>,
        sessions: Arc<dyn SessionReader>,
    ) -> Self {
        Self {
            username: username.into(),
            utmp_file: utmp_file.into(),
            sessions,
        }
    }

    fn logged_out(&self) -> bool {
        match self.sessions.active_users() {
            Ok(active) => !active.contains_key(&self.username),
            Err(e) => {
                warn!(user = %self.username, "Failed to read sessions: {}", e);
                false
            }
        }
    }

    /// Resolve once `username` is seen without a session.
    ///
    /// Checks immediately, then again on each session file change.
    pub async fn wait_with_events(self, mut events: WatchEvents) -> Result<()> {
        if self.logged_out() {
            return Ok(());
        }

        loop {
            match events.recv().await {
                Some(Ok(event)) => {
                    if is_session_event(&event, &self.utmp_file) && self.logged_out() {
                        debug!(user = %self.username, "User logged out");
                        return Ok(());
                    }
                }
                Some(Err(e)) => error!("File watch error: {}", e),
                None => return Err(MonitorError::ChannelClosed("session watcher")),
            }
        }
    }

    /// Watch the session file and wait on a background task.
    ///
    /// The receiver fires exactly once. The watcher is set up before this
    /// returns, so a logout racing the call is not missed.
    pub fn spawn(self) -> Result<oneshot::Receiver<Result<()>>> {
        let (watcher, events) = watch_paths(&[self.utmp_file.clone()])?;
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let _watcher = watcher;
            let result = self.wait_with_events(events).await;
            let _ = tx.send(result);
        });

        Ok(rx)
    }
}

/// Signal that fires once `username` has no session left
pub fn wait_for_logout(
    username: &str,
    utmp_file: impl Into<PathBuf>,
    sessions: Arc<dyn SessionReader>,
) -> Result<oneshot::Receiver<Result<()>>> {
    LogoutWaiter::new(username, utmp_file, sessions).spawn()
}
