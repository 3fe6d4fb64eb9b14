//! User identity resolution via the passwd and group databases

use std::path::PathBuf;

use nix::unistd::{Group, User};

use super::error::{AccountsError, Result};

/// Resolved OS identity of a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Login name
    pub username: String,
    /// User ID
    pub uid: u32,
    /// Primary group ID
    pub gid: u32,
    /// Home directory
    pub home: PathBuf,
}

/// Resolves usernames and group names to numeric IDs
#[cfg_attr(test, mockall::automock)]
pub trait UserIdentityResolver: Send + Sync {
    /// Look up `username`, failing with [`AccountsError::UserNotFound`] if it
    /// no longer exists.
    fn resolve(&self, username: &str) -> Result<UserIdentity>;

    /// Look up the GID of `group_name`
    fn group_id(&self, group_name: &str) -> Result<u32>;
}

/// [`UserIdentityResolver`] using getpwnam/getgrnam
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentityResolver;

impl UserIdentityResolver for SystemIdentityResolver {
    fn resolve(&self, username: &str) -> Result<UserIdentity> {
        let user = User::from_name(username)?
            .ok_or_else(|| AccountsError::UserNotFound(username.to_string()))?;

        Ok(UserIdentity {
            username: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
        })
    }

    fn group_id(&self, group_name: &str) -> Result<u32> {
        Group::from_name(group_name)?
            .map(|group| group.gid.as_raw())
            .ok_or_else(|| AccountsError::NotFound(group_name.to_string()))
    }
}
