//! Kubelet socket directory watch.
//!
//! The kubelet recreates its registration socket on every start and forgets
//! all plugins when it does, so a create event for that file means every
//! instance must register again.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use pcidp_core::{HostEvent, PluginError, Result};
use std::ffi::OsString;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::info;

/// Watch `dir` and forward registration socket creation as [`HostEvent`]s.
///
/// The returned watcher must be kept alive for events to keep flowing.
pub fn watch_registration_socket(
    dir: &Path,
    socket_name: &str,
    tx: mpsc::Sender<HostEvent>,
) -> Result<RecommendedWatcher> {
    let socket_name = OsString::from(socket_name);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => classify(&event, &socket_name),
            Err(e) => Some(HostEvent::WatchError(e.to_string())),
        };
        if let Some(event) = event {
            // Runs on the notify thread, outside the runtime
            let _ = tx.blocking_send(event);
        }
    })
    .map_err(|e| PluginError::WatchFailed(e.to_string()))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| PluginError::WatchFailed(format!("{}: {}", dir.display(), e)))?;

    info!(dir = %dir.display(), "Watching for kubelet restarts");
    Ok(watcher)
}

/// Map a raw file system event to a host event, if it is one we care about.
fn classify(event: &Event, socket_name: &OsString) -> Option<HostEvent> {
    let is_create = matches!(event.kind, EventKind::Create(_));
    let is_socket = event.paths.iter().any(|p| p.file_name() == Some(socket_name.as_os_str()));
    (is_create && is_socket).then_some(HostEvent::RegistrationSocketCreated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::path::PathBuf;
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    const DIR: &str = "/var/lib/kubelet/device-plugins";

    fn classify_in_dir(kind: EventKind, file: &str) -> Option<HostEvent> {
        let name = OsString::from("kubelet.sock");
        classify(&event(kind, &format!("{}/{}", DIR, file)), &name)
    }

    #[test]
    fn test_classify_socket_create() {
        assert_eq!(
            classify_in_dir(EventKind::Create(CreateKind::Any), "kubelet.sock"),
            Some(HostEvent::RegistrationSocketCreated)
        );
    }

    #[test]
    fn test_classify_ignores_other_events() {
        assert_eq!(classify_in_dir(EventKind::Remove(RemoveKind::Any), "kubelet.sock"), None);
        assert_eq!(classify_in_dir(EventKind::Modify(ModifyKind::Any), "kubelet.sock"), None);
        assert_eq!(
            classify_in_dir(EventKind::Create(CreateKind::Any), "pci-dev-0000-00-1f-0.sock"),
            None
        );
    }

    #[tokio::test]
    async fn test_watch_reports_socket_creation() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = watch_registration_socket(dir.path(), "kubelet.sock", tx).unwrap();

        std::fs::write(dir.path().join("other.sock"), b"").unwrap();
        std::fs::write(dir.path().join("kubelet.sock"), b"").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(HostEvent::RegistrationSocketCreated));
    }

    #[test]
    fn test_watch_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let result = watch_registration_socket(&dir.path().join("missing"), "kubelet.sock", tx);
        assert!(matches!(result, Err(PluginError::WatchFailed(_))));
    }
}
