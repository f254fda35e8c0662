//! Watch set - named directories mediating config and the event source
//!
//! The [`WatchSet`] owns the list of [`WatchEntry`] values. Every mutation
//! is persisted through the [`IWatchStore`] port before it takes effect in
//! memory, and is followed by a reconciliation that brings the event
//! source's registrations in line with the enabled entries.
//!
//! Registration failures (missing directory, permission denied, OS watch
//! limits) are logged and never returned; the next reconciliation retries
//! them.

use std::path::Path;
use std::sync::Arc;

use bucketsync_core::domain::{canonical_watch_path, DomainError, WatchEntry};
use bucketsync_core::ports::{IEventSource, IWatchStore};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors returned by watch-set mutations
#[derive(Debug, Error)]
pub enum WatchSetError {
    /// Rejected input or unknown entry
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The entry list could not be saved; nothing was changed
    #[error("Failed to persist watch entries: {0}")]
    Persist(String),
}

impl WatchSetError {
    pub fn is_validation(&self) -> bool {
        matches!(self, WatchSetError::Domain(e) if e.is_validation())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WatchSetError::Domain(e) if e.is_not_found())
    }
}

/// The set of named, persisted watch entries
pub struct WatchSet {
    entries: Mutex<Vec<WatchEntry>>,
    store: Arc<dyn IWatchStore>,
    source: Arc<dyn IEventSource>,
}

impl WatchSet {
    /// Loads the persisted entries and registers the enabled ones
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn load(
        store: Arc<dyn IWatchStore>,
        source: Arc<dyn IEventSource>,
    ) -> anyhow::Result<Self> {
        let entries = store.load_entries().await?;
        info!(count = entries.len(), "Loaded watch entries");

        let set = Self {
            entries: Mutex::new(entries),
            store,
            source,
        };
        set.reconcile().await;
        Ok(set)
    }

    /// Adds a new entry
    ///
    /// # Errors
    /// Validation error for an empty name or path, a relative path, or a
    /// name or path that is already in the set.
    pub async fn add(
        &self,
        name: &str,
        path: &Path,
        enabled: bool,
    ) -> Result<WatchEntry, WatchSetError> {
        let entry = WatchEntry::new(name, path, enabled)?;

        let mut entries = self.entries.lock().await;
        ensure_unique(&entries, &entry, None)?;

        let mut updated = entries.clone();
        updated.push(entry.clone());
        self.commit(&mut entries, updated).await?;

        info!(name = %entry.name(), path = %entry.path().display(), enabled, "Watch entry added");
        Ok(entry)
    }

    /// Removes the entry for `path`; a no-op if there is none
    ///
    /// # Errors
    /// Only persistence failures are reported.
    pub async fn remove(&self, path: &Path) -> Result<(), WatchSetError> {
        let mut entries = self.entries.lock().await;
        let Some(index) = position(&entries, path) else {
            debug!(path = %path.display(), "Remove of unknown watch entry ignored");
            return Ok(());
        };

        let mut updated = entries.clone();
        let removed = updated.remove(index);
        self.commit(&mut entries, updated).await?;

        info!(name = %removed.name(), path = %removed.path().display(), "Watch entry removed");
        Ok(())
    }

    /// Flips the enabled flag of the entry for `path`
    ///
    /// # Errors
    /// Not-found error if no entry has this path.
    pub async fn toggle(&self, path: &Path) -> Result<WatchEntry, WatchSetError> {
        let mut entries = self.entries.lock().await;
        let index = position(&entries, path).ok_or_else(|| not_found(path))?;

        let mut updated = entries.clone();
        let enabled = updated[index].toggle();
        let entry = updated[index].clone();
        self.commit(&mut entries, updated).await?;

        info!(name = %entry.name(), path = %entry.path().display(), enabled, "Watch entry toggled");
        Ok(entry)
    }

    /// Replaces the entry for `path` wholesale, keeping its position
    ///
    /// # Errors
    /// Not-found error if no entry has `path`; validation error if the new
    /// values are malformed or collide with a different entry.
    pub async fn replace(
        &self,
        path: &Path,
        name: &str,
        new_path: &Path,
        enabled: bool,
    ) -> Result<WatchEntry, WatchSetError> {
        let replacement = WatchEntry::new(name, new_path, enabled)?;

        let mut entries = self.entries.lock().await;
        let index = position(&entries, path).ok_or_else(|| not_found(path))?;
        ensure_unique(&entries, &replacement, Some(index))?;

        let mut updated = entries.clone();
        updated[index] = replacement.clone();
        self.commit(&mut entries, updated).await?;

        info!(
            old_path = %path.display(),
            name = %replacement.name(),
            path = %replacement.path().display(),
            enabled,
            "Watch entry replaced"
        );
        Ok(replacement)
    }

    /// Snapshot of all entries in insertion order
    pub async fn list(&self) -> Vec<WatchEntry> {
        self.entries.lock().await.clone()
    }

    /// Returns the enabled entry whose directory contains `file`
    ///
    /// `file` may carry either the entry's stored path or the directory
    /// the event source resolved it to.
    pub async fn covers(&self, file: &Path) -> Option<WatchEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| {
                e.is_enabled()
                    && (e.covers(file)
                        || self
                            .source
                            .resolved(e.path())
                            .is_some_and(|dir| file.starts_with(dir)))
            })
            .cloned()
    }

    /// Registers every enabled entry that is not watched yet and drops
    /// every registration no enabled entry names
    pub async fn reconcile(&self) {
        let entries = self.entries.lock().await;
        self.reconcile_locked(&entries);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Persists `updated`, then installs it and reconciles
    async fn commit(
        &self,
        entries: &mut Vec<WatchEntry>,
        updated: Vec<WatchEntry>,
    ) -> Result<(), WatchSetError> {
        self.store
            .save_entries(&updated)
            .await
            .map_err(|e| WatchSetError::Persist(format!("{e:#}")))?;
        *entries = updated;
        self.reconcile_locked(entries);
        Ok(())
    }

    fn reconcile_locked(&self, entries: &[WatchEntry]) {
        let watched = self.source.watched();

        for stale in watched
            .iter()
            .filter(|w| !entries.iter().any(|e| e.is_enabled() && e.path() == w.as_path()))
        {
            if let Err(err) = self.source.unwatch(stale) {
                warn!(path = %stale.display(), error = %format!("{err:#}"), "Failed to unregister watch");
            }
        }

        for entry in entries
            .iter()
            .filter(|e| e.is_enabled() && !watched.iter().any(|w| w.as_path() == e.path()))
        {
            match self.source.watch(entry.path()) {
                Ok(()) => debug!(path = %entry.path().display(), "Registered watch"),
                Err(err) => warn!(
                    name = %entry.name(),
                    path = %entry.path().display(),
                    error = %format!("{err:#}"),
                    "Failed to register watch, will retry on next change"
                ),
            }
        }
    }
}

fn position(entries: &[WatchEntry], path: &Path) -> Option<usize> {
    entries.iter().position(|e| e.path() == path).or_else(|| {
        let canonical = canonical_watch_path(path).ok()?;
        entries.iter().position(|e| e.path() == canonical)
    })
}

fn not_found(path: &Path) -> WatchSetError {
    DomainError::NotFound(format!("no watch entry for {}", path.display())).into()
}

fn ensure_unique(
    entries: &[WatchEntry],
    candidate: &WatchEntry,
    skip: Option<usize>,
) -> Result<(), DomainError> {
    for (i, existing) in entries.iter().enumerate() {
        if Some(i) == skip {
            continue;
        }
        if existing.name() == candidate.name() {
            return Err(DomainError::ValidationFailed(format!(
                "a watcher named '{}' already exists",
                candidate.name()
            )));
        }
        if existing.path() == candidate.path() {
            return Err(DomainError::ValidationFailed(format!(
                "{} is already watched",
                candidate.path().display()
            )));
        }
    }
    Ok(())
}
