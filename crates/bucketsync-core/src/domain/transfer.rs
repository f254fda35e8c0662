//! Transfer domain types
//!
//! ## State Machine
//!
//! ```text
//!              change signal (any state)
//!        ┌───────────────────────────────────┐
//!        ▼                                   │
//!   ┌─────────┐  delay elapsed  ┌───────────┐ │  ok   ┌──────────┐
//!   │ Queued  │ ──────────────► │ Uploading │ ├─────► │ Complete │
//!   └─────────┘                 └───────────┘ │       └──────────┘
//!                                             │ fail  ┌──────────┐
//!                                             └─────► │  Error   │
//!                                                     └──────────┘
//! ```
//!
//! The live record with its timer handle is private to the upload
//! coordinator. Everything outside the coordinator sees
//! [`TransferTemplate`] snapshots.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of the most recent change-to-upload cycle for a path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Waiting for the settle delay to elapse (or for a concurrency slot)
    #[default]
    Queued,
    /// The file is being sent to the object store
    Uploading,
    /// The last upload succeeded
    Complete,
    /// The last upload failed; only a new change signal restarts the cycle
    Error,
}

impl TransferStatus {
    /// Returns true for `Complete` and `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Complete | TransferStatus::Error)
    }

    /// Stable lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            TransferStatus::Queued => "queued",
            TransferStatus::Uploading => "uploading",
            TransferStatus::Complete => "complete",
            TransferStatus::Error => "error",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" | "inqueue" => Ok(TransferStatus::Queued),
            "uploading" => Ok(TransferStatus::Uploading),
            "complete" | "completed" => Ok(TransferStatus::Complete),
            "error" => Ok(TransferStatus::Error),
            other => Err(format!("unknown transfer status '{other}'")),
        }
    }
}

/// Immutable snapshot of a transfer record
///
/// Delivered to presentation-layer subscribers on every transition and
/// returned by transfer-list queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTemplate {
    /// Local file path (the record key)
    pub path: PathBuf,
    /// Current status
    pub status: TransferStatus,
    /// Set only while `status == Complete`
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferTemplate {
    pub fn new(path: impl Into<PathBuf>, status: TransferStatus) -> Self {
        Self {
            path: path.into(),
            status,
            completed_at: None,
        }
    }

    pub fn with_completed_at(mut self, completed_at: DateTime<Utc>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }
}

/// A failed object-store transfer
///
/// Never returned past the coordinator: it is recorded as `Error` status
/// and written to the error log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Upload of {} failed: {detail}", path.display())]
pub struct UploadError {
    /// File that failed to upload
    pub path: PathBuf,
    /// Error detail reported by the object-store client
    pub detail: String,
}

impl UploadError {
    pub fn new(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Builds an upload error from any error chain, keeping every cause
    pub fn from_anyhow(path: impl Into<PathBuf>, err: &anyhow::Error) -> Self {
        Self::new(path, format!("{err:#}"))
    }
}

/// Derives the object key for a local file
///
/// The key is the full local path with separators normalized to `/` and
/// any leading `/` removed, e.g. `/home/ana/docs/a.txt` becomes
/// `home/ana/docs/a.txt`.
pub fn object_key(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    raw.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TransferStatus::Queued.is_terminal());
        assert!(!TransferStatus::Uploading.is_terminal());
        assert!(TransferStatus::Complete.is_terminal());
        assert!(TransferStatus::Error.is_terminal());
    }

    #[test]
    fn test_status_display_and_parse() {
        for status in [
            TransferStatus::Queued,
            TransferStatus::Uploading,
            TransferStatus::Complete,
            TransferStatus::Error,
        ] {
            let parsed: TransferStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            "InQueue".parse::<TransferStatus>().unwrap(),
            TransferStatus::Queued
        );
        assert_eq!(
            "Completed".parse::<TransferStatus>().unwrap(),
            TransferStatus::Complete
        );
        assert!("paused".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TransferStatus::Uploading).unwrap();
        assert_eq!(json, "\"uploading\"");
    }

    #[test]
    fn test_template_builder() {
        let now = Utc::now();
        let t = TransferTemplate::new("/a/f.txt", TransferStatus::Complete).with_completed_at(now);
        assert_eq!(t.path, PathBuf::from("/a/f.txt"));
        assert_eq!(t.completed_at, Some(now));
    }

    #[test]
    fn test_upload_error_display() {
        let err = UploadError::new("/b/g.txt", "connection reset");
        assert_eq!(err.to_string(), "Upload of /b/g.txt failed: connection reset");
    }

    #[test]
    fn test_upload_error_keeps_cause_chain() {
        let err = anyhow::anyhow!("dns failure").context("put_object failed");
        let upload = UploadError::from_anyhow("/b/g.txt", &err);
        assert_eq!(upload.detail, "put_object failed: dns failure");
    }

    #[test]
    fn test_object_key_strips_leading_slash() {
        assert_eq!(object_key(Path::new("/a/f.txt")), "a/f.txt");
        assert_eq!(object_key(Path::new("/home/ana/My Docs/x.pdf")), "home/ana/My Docs/x.pdf");
    }

    #[test]
    fn test_object_key_normalizes_backslashes() {
        assert_eq!(object_key(Path::new("C:\\Users\\ana\\a.txt")), "C:/Users/ana/a.txt");
    }
}
