//! Group and session reconciliation loop
//!
//! Keeps one [`NorduserState`] per member of the privileged group and drives
//! the service backend so that every member with an active session has a
//! helper, and nobody else does.
//!
//! # Lifecycle
//!
//! ```text
//! Initializing --(initial pass)--> Watching --(event channel closed)--> Terminated
//! ```
//!
//! Passes run strictly one after another. A pass that cannot read the group
//! or the session table is abandoned and the tracked states stay as they
//! were; the next file event retries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::Event;
use tracing::{debug, error, info, warn};

use super::error::{MonitorError, Result};
use super::state::{transition, Action, NorduserState};
use super::watcher::{classify_event, watch_dir_for, watch_paths, Change, WatchEvents};
use crate::accounts::{
    AccountsError, GroupReader, LoginKind, SessionReader, UserIdentityResolver,
};
use crate::config::Config;
use crate::service::ServiceBackend;

/// Where the monitor is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    /// Initial pass not yet complete
    Initializing,
    /// Reacting to file events
    Watching,
    /// Event source gone; no further passes
    Terminated,
}

/// Names and paths the monitor reconciles against
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Privileged group name
    pub group_name: String,
    /// Group database file
    pub group_file: PathBuf,
    /// Session accounting file
    pub utmp_file: PathBuf,
}

impl MonitorSettings {
    /// Settings from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            group_name: config.group.name.clone(),
            group_file: config.group.file.clone(),
            utmp_file: config.sessions.utmp_file.clone(),
        }
    }
}

/// Reconciles group membership and login sessions into helper lifecycle
/// actions
pub struct ReconciliationMonitor {
    settings: MonitorSettings,
    groups: Arc<dyn GroupReader>,
    sessions: Arc<dyn SessionReader>,
    identities: Arc<dyn UserIdentityResolver>,
    backend: Arc<dyn ServiceBackend>,
    users: HashMap<String, NorduserState>,
    phase: MonitorPhase,
}

impl ReconciliationMonitor {
    /// Create a monitor; nothing runs until [`run`](Self::run) or
    /// [`initialize`](Self::initialize)
    pub fn new(
        settings: MonitorSettings,
        groups: Arc<dyn GroupReader>,
        sessions: Arc<dyn SessionReader>,
        identities: Arc<dyn UserIdentityResolver>,
        backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        Self {
            settings,
            groups,
            sessions,
            identities,
            backend,
            users: HashMap::new(),
            phase: MonitorPhase::Initializing,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    /// Tracked state of `username`, if a member
    pub fn state(&self, username: &str) -> Option<NorduserState> {
        self.users.get(username).copied()
    }

    /// All tracked members, sorted
    pub fn tracked(&self) -> Vec<(String, NorduserState)> {
        let mut users: Vec<_> = self
            .users
            .iter()
            .map(|(name, state)| (name.clone(), *state))
            .collect();
        users.sort_by(|a, b| a.0.cmp(&b.0));
        users
    }

    /// Group database this monitor reads
    pub fn group_file(&self) -> &Path {
        &self.settings.group_file
    }

    /// Initial pass: every current member is treated as newly added.
    ///
    /// A failed read is logged rather than returned so the monitor still
    /// reaches the watching phase and picks the group up on the next event.
    pub async fn initialize(&mut self) {
        self.phase = MonitorPhase::Initializing;
        if let Err(e) = self.handle_group_change().await {
            error!("Initial reconciliation failed: {}", e);
        }
        self.phase = MonitorPhase::Watching;
        info!(
            group = %self.settings.group_name,
            members = self.users.len(),
            "Initial reconciliation complete"
        );
    }

    /// Reconcile after the group database changed
    ///
    /// New members start at [`NorduserState::NotActive`] and are transitioned
    /// only if they currently have a session. Removed members are driven to
    /// `NotActive` and dropped from tracking whatever the outcome.
    pub async fn handle_group_change(&mut self) -> Result<()> {
        let members = self.groups.members(&self.settings.group_name)?;
        let sessions = self.sessions.active_users()?;

        for username in &members {
            if self.users.contains_key(username) {
                continue;
            }
            let mut state = NorduserState::NotActive;
            if let Some(kind) = sessions.get(username) {
                state = self.change_state(username, state, *kind).await;
            }
            debug!(user = %username, state = %state, "Tracking new group member");
            self.users.insert(username.clone(), state);
        }

        let mut removed: Vec<String> = self
            .users
            .keys()
            .filter(|name| !members.contains(*name))
            .cloned()
            .collect();
        removed.sort();

        for username in removed {
            if let Some(state) = self.users.remove(&username) {
                self.change_state(&username, state, LoginKind::None).await;
                debug!(user = %username, "No longer tracking former group member");
            }
        }

        Ok(())
    }

    /// Reconcile after the session table changed
    pub async fn handle_session_change(&mut self) -> Result<()> {
        let sessions = self.sessions.active_users()?;

        let mut usernames: Vec<String> = self.users.keys().cloned().collect();
        usernames.sort();

        for username in usernames {
            let observed = sessions.get(&username).copied().unwrap_or(LoginKind::None);
            let current = self.users[&username];
            let next = self.change_state(&username, current, observed).await;
            self.users.insert(username, next);
        }

        Ok(())
    }

    /// Apply one transition, returning the state to record.
    ///
    /// The current state is kept whenever the backend action cannot be
    /// carried out.
    async fn change_state(
        &self,
        username: &str,
        current: NorduserState,
        observed: LoginKind,
    ) -> NorduserState {
        let (next, action) = transition(current, observed);
        if action == Action::None {
            return next;
        }

        let identity = match self.identities.resolve(username) {
            Ok(identity) => identity,
            Err(AccountsError::UserNotFound(_)) => {
                warn!(user = %username, "User no longer exists, skipping {:?}", action);
                return current;
            }
            Err(e) => {
                warn!(user = %username, "Failed to resolve user: {}", e);
                return current;
            }
        };

        let result = match action {
            Action::Enable => self.backend.enable(&identity).await,
            Action::Stop => self.backend.stop(identity.uid).await,
            Action::Restart => self.backend.restart(identity.uid).await,
            Action::None => Ok(()),
        };

        match result {
            Ok(()) => {
                info!(
                    user = %username,
                    uid = identity.uid,
                    from = %current,
                    to = %next,
                    "Helper {:?}",
                    action
                );
                next
            }
            Err(e) => {
                warn!(
                    user = %username,
                    uid = identity.uid,
                    "Helper {:?} failed, keeping {}: {}",
                    action,
                    current,
                    e
                );
                current
            }
        }
    }

    async fn handle_event(&mut self, event: &Event) {
        let change = classify_event(event, &self.settings.group_file, &self.settings.utmp_file);
        let result = match change {
            Some(Change::GroupFile) => self.handle_group_change().await,
            Some(Change::SessionFile) => self.handle_session_change().await,
            None => return,
        };
        if let Err(e) = result {
            error!(?change, "Reconciliation pass abandoned: {}", e);
        }
    }

    /// Run the initial pass, then reconcile on every event from `events`.
    ///
    /// Returns only when the event source closes.
    pub async fn run_with_events(&mut self, mut events: WatchEvents) -> Result<()> {
        self.initialize().await;

        loop {
            match events.recv().await {
                Some(Ok(event)) => self.handle_event(&event).await,
                Some(Err(e)) => error!("File watch error: {}", e),
                None => {
                    self.phase = MonitorPhase::Terminated;
                    error!("File watcher stopped delivering events");
                    return Err(MonitorError::ChannelClosed("file watcher"));
                }
            }
        }
    }

    /// Watch the group directory and the session file, then run
    pub async fn run(&mut self) -> Result<()> {
        let paths = [
            watch_dir_for(&self.settings.group_file),
            self.settings.utmp_file.clone(),
        ];
        let (_watcher, events) = watch_paths(&paths)?;
        self.run_with_events(events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::group::MockGroupReader;
    use crate::accounts::identity::MockUserIdentityResolver;
    use crate::accounts::session::MockSessionReader;
    use crate::accounts::{ActiveSessions, GroupMembers, UserIdentity};
    use crate::service::{MockServiceBackend, ServiceError};
    use notify::event::{CreateKind, EventKind};
    use tokio::sync::mpsc;

    fn identity(username: &str) -> UserIdentity {
        UserIdentity {
            username: username.to_string(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from(format!("/home/{}", username)),
        }
    }

    fn members(names: &[&str]) -> GroupMembers {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            group_name: "nordvpn".to_string(),
            group_file: PathBuf::from("/etc/group"),
            utmp_file: PathBuf::from("/var/run/utmp"),
        }
    }

    fn resolver() -> MockUserIdentityResolver {
        let mut identities = MockUserIdentityResolver::new();
        identities
            .expect_resolve()
            .returning(|name| Ok(identity(name)));
        identities
    }

    fn monitor(
        groups: MockGroupReader,
        sessions: MockSessionReader,
        identities: MockUserIdentityResolver,
        backend: MockServiceBackend,
    ) -> ReconciliationMonitor {
        ReconciliationMonitor::new(
            settings(),
            Arc::new(groups),
            Arc::new(sessions),
            Arc::new(identities),
            Arc::new(backend),
        )
    }

    #[tokio::test]
    async fn test_initialize_enables_logged_in_members() {
        let mut groups = MockGroupReader::new();
        groups
            .expect_members()
            .returning(|_| Ok(members(&["alice", "bob"])));
        let mut sessions = MockSessionReader::new();
        sessions.expect_active_users().returning(|| {
            Ok(ActiveSessions::from([(
                "alice".to_string(),
                LoginKind::GraphicalLogin,
            )]))
        });
        let mut backend = MockServiceBackend::new();
        backend
            .expect_enable()
            .withf(|identity| identity.username == "alice")
            .times(1)
            .returning(|_| Ok(()));

        let mut monitor = monitor(groups, sessions, resolver(), backend);
        monitor.initialize().await;

        assert_eq!(monitor.phase(), MonitorPhase::Watching);
        assert_eq!(monitor.state("alice"), Some(NorduserState::RunningGUI));
        assert_eq!(monitor.state("bob"), Some(NorduserState::NotActive));
    }

    #[tokio::test]
    async fn test_failed_enable_keeps_not_active() {
        let mut groups = MockGroupReader::new();
        groups.expect_members().returning(|_| Ok(members(&["alice"])));
        let mut sessions = MockSessionReader::new();
        sessions.expect_active_users().returning(|| {
            Ok(ActiveSessions::from([(
                "alice".to_string(),
                LoginKind::TextLogin,
            )]))
        });
        let mut backend = MockServiceBackend::new();
        backend
            .expect_enable()
            .returning(|_| Err(ServiceError::NotStarted(1000)));

        let mut monitor = monitor(groups, sessions, resolver(), backend);
        monitor.initialize().await;

        assert_eq!(monitor.state("alice"), Some(NorduserState::NotActive));
    }

    #[tokio::test]
    async fn test_vanished_user_is_skipped() {
        let mut groups = MockGroupReader::new();
        groups.expect_members().returning(|_| Ok(members(&["ghost"])));
        let mut sessions = MockSessionReader::new();
        sessions.expect_active_users().returning(|| {
            Ok(ActiveSessions::from([(
                "ghost".to_string(),
                LoginKind::TextLogin,
            )]))
        });
        let mut identities = MockUserIdentityResolver::new();
        identities
            .expect_resolve()
            .returning(|name| Err(AccountsError::UserNotFound(name.to_string())));
        let mut backend = MockServiceBackend::new();
        backend.expect_enable().never();

        let mut monitor = monitor(groups, sessions, identities, backend);
        monitor.initialize().await;

        assert_eq!(monitor.state("ghost"), Some(NorduserState::NotActive));
    }

    #[tokio::test]
    async fn test_session_read_failure_abandons_pass() {
        let mut groups = MockGroupReader::new();
        groups.expect_members().returning(|_| Ok(members(&["alice"])));
        let mut sessions = MockSessionReader::new();
        sessions
            .expect_active_users()
            .returning(|| Err(AccountsError::SessionTable("gone".to_string())));
        let backend = MockServiceBackend::new();

        let mut monitor = monitor(groups, sessions, resolver(), backend);

        assert!(matches!(
            monitor.handle_group_change().await,
            Err(MonitorError::Accounts(AccountsError::SessionTable(_)))
        ));
        assert!(monitor.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_group_read_failure_still_reaches_watching() {
        let mut groups = MockGroupReader::new();
        groups
            .expect_members()
            .returning(|name| Err(AccountsError::NotFound(name.to_string())));
        let sessions = MockSessionReader::new();
        let backend = MockServiceBackend::new();

        let mut monitor = monitor(groups, sessions, resolver(), backend);
        monitor.initialize().await;

        assert_eq!(monitor.phase(), MonitorPhase::Watching);
        assert!(monitor.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_terminates() {
        let mut groups = MockGroupReader::new();
        groups.expect_members().returning(|_| Ok(GroupMembers::new()));
        let mut sessions = MockSessionReader::new();
        sessions
            .expect_active_users()
            .returning(|| Ok(ActiveSessions::new()));
        let backend = MockServiceBackend::new();

        let mut monitor = monitor(groups, sessions, resolver(), backend);
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/group"))))
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(
            monitor.run_with_events(rx).await,
            Err(MonitorError::ChannelClosed(_))
        ));
        assert_eq!(monitor.phase(), MonitorPhase::Terminated);
    }
}
