//! Change dispatcher - routes settled changes into the upload coordinator
//!
//! The [`ChangeDispatcher`] sits between the
//! [`DirectoryEventSource`](super::watcher::DirectoryEventSource) and the
//! [`UploadCoordinator`](super::coordinator::UploadCoordinator). It drops
//! paths that no enabled watch entry covers, which filters out late events
//! from directories that were just removed or disabled.
//!
//! ## Flow
//!
//! ```text
//! DirectoryEventSource ──→ mpsc::Receiver ──→ ChangeDispatcher ──→ queue_for_upload(path)
//!                                                   │
//!                                            WatchSet::covers
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::UploadCoordinator;
use crate::watch_set::WatchSet;

/// Forwards settled change signals to the coordinator
pub struct ChangeDispatcher {
    changes: mpsc::Receiver<PathBuf>,
    watch_set: Arc<WatchSet>,
    coordinator: UploadCoordinator,
}

impl ChangeDispatcher {
    pub fn new(
        changes: mpsc::Receiver<PathBuf>,
        watch_set: Arc<WatchSet>,
        coordinator: UploadCoordinator,
    ) -> Self {
        Self {
            changes,
            watch_set,
            coordinator,
        }
    }

    /// Handles a single settled path
    ///
    /// Returns `true` if the path was queued for upload.
    pub async fn dispatch(&self, path: PathBuf) -> bool {
        match self.watch_set.covers(&path).await {
            Some(entry) => {
                debug!(path = %path.display(), watcher = %entry.name(), "Dispatching change");
                self.coordinator.queue_for_upload(path);
                true
            }
            None => {
                debug!(path = %path.display(), "Dropping change outside enabled watchers");
                false
            }
        }
    }

    /// Main loop
    ///
    /// Runs until `cancel` fires or the event source closes its channel.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Change dispatcher starting");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, change dispatcher stopping");
                    break;
                }
                change = self.changes.recv() => match change {
                    Some(path) => {
                        self.dispatch(path).await;
                    }
                    None => {
                        info!("Change channel closed, change dispatcher stopping");
                        break;
                    }
                },
            }
        }

        info!("Change dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use bucketsync_core::config::CredentialsConfig;
    use bucketsync_core::domain::{TransferStatus, WatchEntry};
    use bucketsync_core::ports::{
        ErrorLogEntry, IErrorLog, IEventSource, IObjectStore, IObjectStoreFactory, IWatchStore,
        NullNotifier,
    };

    use super::*;
    use crate::coordinator::CoordinatorOptions;

    struct OkStore;

    #[async_trait::async_trait]
    impl IObjectStore for OkStore {
        async fn put(&self, _bucket: &str, _key: &str, _file: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct OkFactory;

    impl IObjectStoreFactory for OkFactory {
        fn connect(&self, _c: &CredentialsConfig) -> anyhow::Result<Arc<dyn IObjectStore>> {
            Ok(Arc::new(OkStore))
        }
    }

    struct NoLog;

    #[async_trait::async_trait]
    impl IErrorLog for NoLog {
        async fn append(&self, _entry: &ErrorLogEntry) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FixedStore(Vec<WatchEntry>);

    #[async_trait::async_trait]
    impl IWatchStore for FixedStore {
        async fn load_entries(&self) -> anyhow::Result<Vec<WatchEntry>> {
            Ok(self.0.clone())
        }

        async fn save_entries(&self, _entries: &[WatchEntry]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NoopSource(Mutex<Vec<PathBuf>>);

    impl IEventSource for NoopSource {
        fn watch(&self, path: &Path) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        fn unwatch(&self, path: &Path) -> anyhow::Result<()> {
            self.0.lock().unwrap().retain(|p| p != path);
            Ok(())
        }

        fn watched(&self) -> Vec<PathBuf> {
            self.0.lock().unwrap().clone()
        }
    }

    async fn setup() -> (mpsc::Sender<PathBuf>, ChangeDispatcher, UploadCoordinator) {
        let entries = vec![
            WatchEntry::new("A", "/a", true).unwrap(),
            WatchEntry::new("B", "/b", false).unwrap(),
        ];
        let watch_set = WatchSet::load(Arc::new(FixedStore(entries)), Arc::new(NoopSource::default()))
            .await
            .unwrap();
        let coordinator = UploadCoordinator::new(
            &CredentialsConfig::default(),
            Arc::new(OkFactory),
            Arc::new(NoLog),
            Arc::new(NullNotifier),
            CoordinatorOptions {
                delay: Duration::from_secs(5),
                max_concurrent: 1,
                max_retained: None,
            },
        )
        .unwrap();
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = ChangeDispatcher::new(rx, Arc::new(watch_set), coordinator.clone());
        (tx, dispatcher, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_filters_by_enabled_entries() {
        let (_tx, dispatcher, coordinator) = setup().await;

        assert!(dispatcher.dispatch(PathBuf::from("/a/f.txt")).await);
        assert!(!dispatcher.dispatch(PathBuf::from("/b/g.txt")).await);
        assert!(!dispatcher.dispatch(PathBuf::from("/c/h.txt")).await);

        let list = coordinator.get_transfer_list(None);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path, PathBuf::from("/a/f.txt"));
        assert_eq!(list[0].status, TransferStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_channel_close() {
        let (tx, dispatcher, coordinator) = setup().await;

        tx.send(PathBuf::from("/a/one.txt")).await.unwrap();
        tx.send(PathBuf::from("/a/two.txt")).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), dispatcher.run(CancellationToken::new()))
            .await
            .expect("dispatcher should exit when the channel closes");
        assert_eq!(coordinator.get_transfer_list(None).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_cancel() {
        let (_tx, dispatcher, _coordinator) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), dispatcher.run(cancel))
            .await
            .expect("dispatcher should exit on cancellation");
    }
}
