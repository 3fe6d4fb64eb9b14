//! Login session accounting
//!
//! Enumerates `USER_PROCESS` entries of the utmpx table and classifies each
//! user as logged in graphically or on a text console. The graphical signal
//! is a display-server variable in the login process environment; when that
//! environment cannot be read the session counts as a text login.

use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::{AccountsError, Result};

/// getutxent() walks a process-global cursor
static UTMP_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Kind of interactive login observed for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginKind {
    /// No active session
    None,
    /// Only console/terminal sessions
    TextLogin,
    /// At least one graphical session
    GraphicalLogin,
}

impl LoginKind {
    /// Merge two observations for the same user; graphical wins
    pub fn merge(self, other: LoginKind) -> LoginKind {
        match (self, other) {
            (LoginKind::GraphicalLogin, _) | (_, LoginKind::GraphicalLogin) => {
                LoginKind::GraphicalLogin
            }
            (LoginKind::TextLogin, _) | (_, LoginKind::TextLogin) => LoginKind::TextLogin,
            _ => LoginKind::None,
        }
    }
}

impl std::fmt::Display for LoginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::TextLogin => write!(f, "text"),
            Self::GraphicalLogin => write!(f, "graphical"),
        }
    }
}

/// Users with at least one active login, keyed by username
pub type ActiveSessions = HashMap<String, LoginKind>;

/// Source of active login sessions
#[cfg_attr(test, mockall::automock)]
pub trait SessionReader: Send + Sync {
    /// Every user with an active interactive login and the kind of that login
    fn active_users(&self) -> Result<ActiveSessions>;
}

/// One `USER_PROCESS` record from the accounting table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Login name
    pub user: String,
    /// PID of the session leader
    pub pid: i32,
}

/// [`SessionReader`] backed by the native utmpx accessor
#[derive(Debug, Clone)]
pub struct UtmpSessionReader {
    utmp_file: PathBuf,
    proc_root: PathBuf,
    gui_env_vars: Vec<String>,
}

impl UtmpSessionReader {
    /// Create a reader
    ///
    /// `utmp_file` must exist for a pass to succeed; records are read through
    /// the C library's default database, which is that file on Linux.
    pub fn new(
        utmp_file: impl Into<PathBuf>,
        proc_root: impl Into<PathBuf>,
        gui_env_vars: Vec<String>,
    ) -> Self {
        Self {
            utmp_file: utmp_file.into(),
            proc_root: proc_root.into(),
            gui_env_vars,
        }
    }

    fn read_records(&self) -> Result<Vec<SessionRecord>> {
        let table_error = |e: &dyn std::fmt::Display| {
            AccountsError::SessionTable(format!("{}: {}", self.utmp_file.display(), e))
        };

        std::fs::metadata(&self.utmp_file).map_err(|e| table_error(&e))?;
        let path = CString::new(self.utmp_file.as_os_str().as_bytes())
            .map_err(|e| table_error(&e))?;

        let _guard = UTMP_LOCK.lock();
        let mut records = Vec::new();

        // SAFETY: the cursor functions are only used while holding UTMP_LOCK,
        // and each returned entry is copied before the next getutxent call.
        unsafe {
            if libc::utmpxname(path.as_ptr()) != 0 {
                return Err(table_error(&std::io::Error::last_os_error()));
            }
            libc::setutxent();
            loop {
                let entry = libc::getutxent();
                if entry.is_null() {
                    break;
                }
                let entry = &*entry;
                if entry.ut_type != libc::USER_PROCESS {
                    continue;
                }

                let user = c_chars_to_string(&entry.ut_user);
                if user.is_empty() {
                    continue;
                }
                records.push(SessionRecord {
                    user,
                    pid: entry.ut_pid,
                });
            }
            libc::endutxent();
        }

        trace!(count = records.len(), "Read user process records");
        Ok(records)
    }
}

impl SessionReader for UtmpSessionReader {
    fn active_users(&self) -> Result<ActiveSessions> {
        let records = self.read_records()?;
        Ok(classify_sessions(
            &records,
            &self.proc_root,
            &self.gui_env_vars,
        ))
    }
}

/// Collapse session records into one [`LoginKind`] per user
pub fn classify_sessions(
    records: &[SessionRecord],
    proc_root: &Path,
    gui_env_vars: &[String],
) -> ActiveSessions {
    let mut sessions = ActiveSessions::new();

    for record in records {
        let kind = if is_graphical_session(proc_root, record.pid, gui_env_vars) {
            LoginKind::GraphicalLogin
        } else {
            LoginKind::TextLogin
        };

        sessions
            .entry(record.user.clone())
            .and_modify(|existing| *existing = existing.merge(kind))
            .or_insert(kind);
    }

    debug!(users = sessions.len(), "Classified active sessions");
    sessions
}

/// Whether the environment of `pid` names a display server
///
/// Returns false when the environment is unreadable (process gone, or
/// insufficient permissions).
pub fn is_graphical_session(proc_root: &Path, pid: i32, gui_env_vars: &[String]) -> bool {
    let environ_path = proc_root.join(pid.to_string()).join("environ");
    let environ = match std::fs::read(&environ_path) {
        Ok(environ) => environ,
        Err(e) => {
            trace!("Cannot read {}: {}", environ_path.display(), e);
            return false;
        }
    };

    environ
        .split(|b| *b == 0)
        .filter_map(|entry| std::str::from_utf8(entry).ok())
        .filter_map(|entry| entry.split_once('='))
        .any(|(key, value)| !value.is_empty() && gui_env_vars.iter().any(|var| var == key))
}

/// Copy a fixed-size, possibly unterminated C char field
fn c_chars_to_string(field: &[c_char]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
