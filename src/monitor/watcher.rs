//! Filesystem change events for the group and session accounting files

use std::path::{Path, PathBuf};

use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::debug;

use super::error::Result;

/// Raw event stream delivered by the watcher thread
pub type WatchEvents = mpsc::Receiver<notify::Result<Event>>;

const CHANNEL_CAPACITY: usize = 64;

/// Which source of truth an event touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Group database replaced or modified
    GroupFile,
    /// Session accounting table changed
    SessionFile,
}

/// Watch `paths` non-recursively.
///
/// The returned watcher must be kept alive for events to keep flowing; once
/// it is dropped the receiver yields `None`.
pub fn watch_paths(paths: &[PathBuf]) -> Result<(RecommendedWatcher, WatchEvents)> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.blocking_send(res);
    })?;

    for path in paths {
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        debug!("Watching {}", path.display());
    }

    Ok((watcher, rx))
}

/// Directory to watch for a file that gets replaced atomically
pub fn watch_dir_for(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => file.to_path_buf(),
    }
}

/// Classify an event against the two watched files.
///
/// Group tools replace the file by rename, so creation counts alongside
/// modification. Reads of the session file are ignored; the monitor reads it
/// itself on every pass.
pub fn classify_event(event: &Event, group_file: &Path, utmp_file: &Path) -> Option<Change> {
    if is_group_event(event, group_file) {
        Some(Change::GroupFile)
    } else if is_session_event(event, utmp_file) {
        Some(Change::SessionFile)
    } else {
        None
    }
}

/// Group database created or modified
pub fn is_group_event(event: &Event, group_file: &Path) -> bool {
    touches(event, group_file) && matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Session file changed in any way other than being read
pub fn is_session_event(event: &Event, utmp_file: &Path) -> bool {
    touches(event, utmp_file) && !matches!(event.kind, EventKind::Access(_))
}

fn touches(event: &Event, target: &Path) -> bool {
    event.paths.iter().any(|p| p == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    const GROUP: &str = "/etc/group";
    const UTMP: &str = "/var/run/utmp";

    fn classify(ev: &Event) -> Option<Change> {
        classify_event(ev, Path::new(GROUP), Path::new(UTMP))
    }

    #[test]
    fn test_group_file_create_and_modify() {
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), GROUP)),
            Some(Change::GroupFile)
        );
        assert_eq!(
            classify(&event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), GROUP)),
            Some(Change::GroupFile)
        );
        assert_eq!(
            classify(&event(EventKind::Remove(RemoveKind::File), GROUP)),
            None
        );
    }

    #[test]
    fn test_unrelated_files_ignored() {
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), "/etc/group-")),
            None
        );
        assert_eq!(
            classify(&event(EventKind::Modify(ModifyKind::Any), "/etc/gshadow")),
            None
        );
    }

    #[test]
    fn test_session_file_ignores_access() {
        assert_eq!(
            classify(&event(EventKind::Modify(ModifyKind::Any), UTMP)),
            Some(Change::SessionFile)
        );
        assert_eq!(
            classify(&event(EventKind::Access(AccessKind::Any), UTMP)),
            None
        );
    }

    #[test]
    fn test_watch_dir_for() {
        assert_eq!(watch_dir_for(Path::new("/etc/group")), PathBuf::from("/etc"));
        assert_eq!(watch_dir_for(Path::new("group")), PathBuf::from("group"));
    }

    #[tokio::test]
    async fn test_watcher_delivers_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let group = dir.path().join("group");

        let (_watcher, mut events) = watch_paths(&[dir.path().to_path_buf()]).unwrap();
        std::fs::write(&group, "nordvpn:x:996:alice\n").unwrap();

        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(res) = events.recv().await {
                let ev = res.unwrap();
                if classify_event(&ev, &group, Path::new(UTMP)) == Some(Change::GroupFile) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(found);
    }

    #[test]
    fn test_watch_missing_path_fails() {
        assert!(watch_paths(&[PathBuf::from("/nonexistent/dir")]).is_err());
    }
}
