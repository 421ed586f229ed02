//! Directory watcher: turns newly created files into broadcasts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use metrics::counter;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::{HubError, HubHandle};
use crate::metrics::{WATCHER_FILES_BROADCAST_TOTAL, WATCHER_READ_ERRORS_TOTAL};
use crate::supervisor::{Worker, supervise};

/// Errors starting a directory watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The path does not name an existing directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    /// The platform watcher could not be created or attached.
    #[error("watcher: {0}")]
    Notify(#[from] notify::Error),
}

/// Why the watch loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    /// The service token was cancelled.
    Cancelled,
    /// The hub stopped accepting broadcasts.
    HubClosed,
    /// The platform watcher's event or error stream closed.
    StreamClosed,
    /// The loop panicked.
    Faulted,
}

/// Watches one directory (non-recursively) and broadcasts every file created
/// in it.
pub struct DirectoryWatcher {
    dir: PathBuf,
    hub: HubHandle,
    settle_delay: Duration,
    cancel: CancellationToken,
}

impl DirectoryWatcher {
    /// Configure a watcher; nothing is observed until [`spawn`](Self::spawn).
    pub fn new(
        dir: impl Into<PathBuf>,
        hub: HubHandle,
        settle_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dir: dir.into(),
            hub,
            settle_delay,
            cancel,
        }
    }

    /// Attach to the directory and run the watch loop on its own task.
    ///
    /// The platform watcher moves into the task and is released whenever the
    /// loop ends.
    pub fn spawn(self) -> Result<JoinHandle<WatchExit>, WatchError> {
        if !self.dir.is_dir() {
            return Err(WatchError::NotADirectory(self.dir));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Send failures mean the loop has already exited.
            let _ = match res {
                Ok(event) => event_tx.send(event).map_err(drop),
                Err(e) => error_tx.send(e).map_err(drop),
            };
        })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        info!(dir = %self.dir.display(), "watching directory for new files");

        Ok(tokio::spawn(async move {
            supervise(Worker::Watcher, self.run(watcher, event_rx, error_rx))
                .await
                .unwrap_or(WatchExit::Faulted)
        }))
    }

    async fn run(
        self,
        _watcher: RecommendedWatcher,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut errors: mpsc::UnboundedReceiver<notify::Error>,
    ) -> WatchExit {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("watcher cancelled");
                    return WatchExit::Cancelled;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("watcher event stream closed");
                        return WatchExit::StreamClosed;
                    };
                    if let Some(exit) = self.handle_event(event).await {
                        return exit;
                    }
                }
                err = errors.recv() => {
                    let Some(err) = err else {
                        warn!("watcher error stream closed");
                        return WatchExit::StreamClosed;
                    };
                    error!(error = %err, "watcher error");
                }
            }
        }
    }

    async fn handle_event(&self, event: Event) -> Option<WatchExit> {
        if !is_arrival(&event.kind) {
            return None;
        }
        for path in event.paths {
            if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
                continue;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Some(WatchExit::Cancelled),
                () = tokio::time::sleep(self.settle_delay) => {}
            }
            if broadcast_file(&self.hub, &path).await.is_err() {
                info!("hub closed, watcher exiting");
                return Some(WatchExit::HubClosed);
            }
        }
        None
    }
}

/// Whether `kind` means a new entry appeared in the directory.
///
/// Producers write a temp file and rename it into place, so the rename's
/// destination counts as a creation. `RenameMode::Both` is skipped: inotify
/// reports it alongside `To` for the same rename, with the old path first.
fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any))
    )
}

/// Read `path` and hand its bytes to the hub.
///
/// Read failures are logged and counted, then skipped (`Ok(false)`).
pub async fn broadcast_file(hub: &HubHandle, path: &Path) -> Result<bool, HubError> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed reading created file");
            counter!(WATCHER_READ_ERRORS_TOTAL).increment(1);
            return Ok(false);
        }
    };
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    info!(file = name.as_deref().unwrap_or_default(), bytes = content.len(), "broadcasting file");
    hub.broadcast(content).await?;
    counter!(WATCHER_FILES_BROADCAST_TOTAL).increment(1);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use crate::queue::OutboundQueue;
    use crate::hub::SessionId;
    use bytes::Bytes;

    async fn listener(hub: &HubHandle) -> mpsc::Receiver<Bytes> {
        let (queue, rx) = OutboundQueue::bounded(16);
        hub.register(SessionId::next(), queue).await.unwrap();
        rx
    }

    #[tokio::test]
    async fn missing_directory_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (hub, _task) = Hub::spawn(16);
        let watcher = DirectoryWatcher::new(
            tmp.path().join("nope"),
            hub,
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        assert!(matches!(watcher.spawn(), Err(WatchError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn created_file_is_broadcast_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (hub, _task) = Hub::spawn(16);
        let mut rx = listener(&hub).await;
        let cancel = CancellationToken::new();
        let task = DirectoryWatcher::new(tmp.path(), hub.clone(), Duration::from_millis(100), cancel.clone())
            .spawn()
            .unwrap();

        std::fs::write(tmp.path().join("a.json"), br#"{"x":1}"#).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(br#"{"x":1}"#));
        let extra = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
        assert!(extra.is_err(), "file must be broadcast exactly once");

        cancel.cancel();
        assert_eq!(task.await.unwrap(), WatchExit::Cancelled);
    }

    #[test]
    fn rename_destination_counts_as_arrival() {
        use notify::event::{CreateKind, DataChange, RemoveKind};

        assert!(is_arrival(&EventKind::Create(CreateKind::File)));
        assert!(is_arrival(&EventKind::Modify(ModifyKind::Name(RenameMode::To))));
        assert!(is_arrival(&EventKind::Modify(ModifyKind::Name(RenameMode::Any))));
        assert!(!is_arrival(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))));
        assert!(!is_arrival(&EventKind::Modify(ModifyKind::Name(RenameMode::From))));
        assert!(!is_arrival(&EventKind::Modify(ModifyKind::Data(DataChange::Any))));
        assert!(!is_arrival(&EventKind::Remove(RemoveKind::File)));
    }

    #[tokio::test]
    async fn file_renamed_into_place_is_broadcast_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (hub, _task) = Hub::spawn(16);
        let mut rx = listener(&hub).await;
        let cancel = CancellationToken::new();
        let task = DirectoryWatcher::new(tmp.path(), hub.clone(), Duration::from_millis(100), cancel.clone())
            .spawn()
            .unwrap();

        let staged = tmp.path().join(".tmp-123");
        std::fs::write(&staged, br#"{"x":1}"#).unwrap();
        std::fs::rename(&staged, tmp.path().join("a.json")).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(br#"{"x":1}"#));
        let extra = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(extra.is_err(), "renamed file must be broadcast exactly once");

        cancel.cancel();
        assert_eq!(task.await.unwrap(), WatchExit::Cancelled);
    }

    #[tokio::test]
    async fn created_subdirectory_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let (hub, _task) = Hub::spawn(16);
        let mut rx = listener(&hub).await;
        let cancel = CancellationToken::new();
        let task = DirectoryWatcher::new(tmp.path(), hub.clone(), Duration::from_millis(10), cancel.clone())
            .spawn()
            .unwrap();

        std::fs::create_dir(tmp.path().join("nested")).unwrap();

        let got = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(got.is_err());
        cancel.cancel();
        assert_eq!(task.await.unwrap(), WatchExit::Cancelled);
    }

    #[tokio::test]
    async fn watcher_exits_when_hub_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (hub, _task) = Hub::spawn(16);
        let task = DirectoryWatcher::new(tmp.path(), hub.clone(), Duration::from_millis(10), CancellationToken::new())
            .spawn()
            .unwrap();

        hub.shutdown().await;
        std::fs::write(tmp.path().join("late.txt"), b"late").unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(exit, WatchExit::HubClosed);
    }

    #[tokio::test]
    async fn unreadable_file_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let (hub, _task) = Hub::spawn(16);
        let mut rx = listener(&hub).await;
        let sent = broadcast_file(&hub, &tmp.path().join("gone.json")).await.unwrap();
        assert!(!sent);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_file_after_shutdown_is_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("files.json");
        std::fs::write(&path, b"[]").unwrap();
        let (hub, _task) = Hub::spawn(16);
        hub.shutdown().await;
        assert_eq!(broadcast_file(&hub, &path).await, Err(HubError::Closed));
    }
}
