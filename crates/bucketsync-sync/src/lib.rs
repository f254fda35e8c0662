//! BucketSync Sync - change detection and upload scheduling
//!
//! Provides:
//! - Recursive directory monitoring with write settling
//! - The watch set of named, persisted directories
//! - The per-path debounced upload coordinator
//! - Push-style transfer status notifications
//!
//! ## Modules
//!
//! - [`watcher`] - Directory event source (notify) and settle queue
//! - [`watch_set`] - Named watch entries mediating config and event source
//! - [`coordinator`] - Per-path transfer records, timers and uploads
//! - [`dispatcher`] - Routes settled changes into the coordinator
//! - [`notifier`] - Broadcast-based status notifier

pub mod coordinator;
pub mod dispatcher;
pub mod notifier;
pub mod watch_set;
pub mod watcher;

pub use coordinator::UploadCoordinator;
pub use dispatcher::ChangeDispatcher;
pub use notifier::BroadcastNotifier;
pub use watch_set::WatchSet;
pub use watcher::DirectoryEventSource;

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while registering directories with the event source
///
/// These never abort the watch loop: the watch set logs them and retries
/// on its next reconciliation.
#[derive(Debug, Error)]
pub enum WatchSourceError {
    /// The OS watcher could not be created
    #[error("Failed to create file watcher: {0}")]
    Init(#[source] notify::Error),

    /// The directory does not exist
    #[error("Directory not found: {}", .0.display())]
    Missing(PathBuf),

    /// The directory exists but cannot be read
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// The path exists but is not a directory
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The OS watcher rejected the registration
    #[error("Failed to watch {}: {source}", path.display())]
    Backend {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Any other I/O failure while resolving the path
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WatchSourceError {
    /// Classifies an I/O error raised while resolving `path`
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::Missing(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}
