//! Group database reader
//!
//! Reads `/etc/group`-formatted files and extracts the member list of one
//! group. Lines look like `name:x:gid:member1,member2`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::error::{AccountsError, Result};

/// Set of usernames belonging to a group
pub type GroupMembers = BTreeSet<String>;

/// Source of group membership
#[cfg_attr(test, mockall::automock)]
pub trait GroupReader: Send + Sync {
    /// Usernames that are members of `group_name`
    fn members(&self, group_name: &str) -> Result<GroupMembers>;
}

/// [`GroupReader`] backed by a group database file
#[derive(Debug, Clone)]
pub struct EtcGroupReader {
    path: PathBuf,
}

impl EtcGroupReader {
    /// Create a reader for the given group file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the group file being read
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GroupReader for EtcGroupReader {
    fn members(&self, group_name: &str) -> Result<GroupMembers> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|source| AccountsError::GroupRead {
                path: self.path.clone(),
                source,
            })?;

        let members = parse_group_members(&contents, group_name)?;
        trace!(group = group_name, count = members.len(), "Read group members");
        Ok(members)
    }
}

/// Extract the members of `group_name` from group file contents.
///
/// The name field must match exactly, so `nordvpn_extra` never matches a
/// lookup for `nordvpn`. An empty member field yields an empty set.
pub fn parse_group_members(contents: &str, group_name: &str) -> Result<GroupMembers> {
    for line in contents.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.splitn(4, ':').collect();
        if fields.len() < 4 || fields[0] != group_name {
            continue;
        }

        return Ok(fields[3]
            .split(',')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .map(str::to_string)
            .collect());
    }

    Err(AccountsError::NotFound(group_name.to_string()))
}
