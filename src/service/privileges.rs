//! Credential drop for child processes

use nix::unistd::{setgid, setgroups, setuid, Gid, Uid};
use tokio::process::Command;

/// Run `cmd` as `uid`/`gid` with exactly `groups` as supplementary groups.
///
/// No-op when the current process already runs as `uid`, since an
/// unprivileged caller cannot call setgroups.
pub(crate) fn run_as(cmd: &mut Command, uid: u32, gid: u32, groups: &[u32]) {
    if Uid::effective().as_raw() == uid {
        return;
    }

    let groups: Vec<Gid> = groups.iter().copied().map(Gid::from_raw).collect();

    // SAFETY: the closure runs between fork and exec and only issues the
    // setgroups/setgid/setuid syscalls, which are async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            setgroups(&groups)?;
            setgid(Gid::from_raw(gid))?;
            setuid(Uid::from_raw(uid))?;
            Ok(())
        });
    }
}
