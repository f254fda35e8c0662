//! WatchEntry domain entity
//!
//! A watch entry is a named directory that BucketSync monitors for changes.
//! Entries are owned by the watch set and persisted in the `watchers`
//! section of the configuration file.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A named, persisted directory path with an enabled/disabled flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    name: String,
    path: PathBuf,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl WatchEntry {
    /// Creates a validated watch entry
    ///
    /// The name is trimmed and must not be empty. The path must be absolute
    /// and is stored in canonical form (see [`canonical_watch_path`]).
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` for an empty name or path and
    /// `DomainError::InvalidPath` for a relative path.
    pub fn new(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        enabled: bool,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DomainError::ValidationFailed(
                "name must not be empty".to_string(),
            ));
        }

        let path = canonical_watch_path(path.as_ref())?;

        Ok(Self {
            name,
            path,
            enabled,
        })
    }

    /// Display name of the entry
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical directory path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether changes under this path are currently synchronized
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Flips the enabled flag and returns the new value
    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.enabled
    }

    /// Returns true if `file` is this entry's path or lies beneath it
    pub fn covers(&self, file: &Path) -> bool {
        file.starts_with(&self.path)
    }
}

/// Converts a user-supplied directory path into the canonical form used as
/// the watch-entry key.
///
/// `.` and `..` components are resolved lexically. When the directory
/// exists, symbolic links are resolved as well so that change events
/// reported by the OS (which carry resolved paths) match the entry.
///
/// # Errors
/// `ValidationFailed` for an empty path, `InvalidPath` for a relative path
/// or one that escapes the filesystem root.
pub fn canonical_watch_path(path: &Path) -> Result<PathBuf, DomainError> {
    if path.as_os_str().is_empty() {
        return Err(DomainError::ValidationFailed(
            "folder path must not be empty".to_string(),
        ));
    }

    if !path.is_absolute() {
        return Err(DomainError::InvalidPath(format!(
            "Path must be absolute: {}",
            path.display()
        )));
    }

    let normalized = normalize_lexically(path)?;

    match std::fs::canonicalize(&normalized) {
        Ok(resolved) => Ok(resolved),
        Err(_) => Ok(normalized),
    }
}

fn normalize_lexically(path: &Path) -> Result<PathBuf, DomainError> {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => normalized.push(p.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(DomainError::InvalidPath(
                        "Path escapes root via ..".to_string(),
                    ));
                }
            }
            Component::Normal(c) => normalized.push(c),
        }
    }

    Ok(normalized)
}
