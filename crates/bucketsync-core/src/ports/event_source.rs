//! Event source port (driven/secondary port)
//!
//! Registration interface of the directory event source. The watch set
//! keeps the registered paths in line with its enabled entries; the
//! settled `changed(path)` signals themselves flow over a channel owned by
//! the adapter.
//!
//! ## Design Notes
//!
//! - Synchronous, because OS watch registration is synchronous.
//! - Registration failures are adapter-specific (`anyhow::Result`); the
//!   watch set logs them and retries on its next reconciliation.

use std::path::{Path, PathBuf};

/// Port trait for registering monitored directories at runtime
pub trait IEventSource: Send + Sync {
    /// Starts monitoring `path` recursively
    ///
    /// Registering an already registered path is a no-op.
    fn watch(&self, path: &Path) -> anyhow::Result<()>;

    /// Stops monitoring `path`
    ///
    /// Unregistering a path that is not registered is a no-op.
    fn unwatch(&self, path: &Path) -> anyhow::Result<()>;

    /// Currently registered paths
    fn watched(&self) -> Vec<PathBuf>;

    /// Directory the adapter reports changes under for the registered
    /// `path`, when it differs from `path` (e.g. a resolved symlink)
    fn resolved(&self, _path: &Path) -> Option<PathBuf> {
        None
    }
}
