//! FileErrorLog - append-only text log of failed uploads
//!
//! One line per failure:
//!
//! ```text
//! 2026-03-01T10:15:00+00:00 | /home/ana/b/g.txt | permission_denied | Forbidden: AccessDenied: Access Denied
//! ```
//!
//! The detail is the last field, so it may itself contain `" | "`.
//! Line breaks inside the detail are flattened to spaces.

use std::path::{Path, PathBuf};

use bucketsync_core::ports::{ErrorLogEntry, IErrorLog};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{AuditError, ReasonCode};

const SEPARATOR: &str = " | ";

/// A parsed line of the error log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLogRecord {
    pub entry: ErrorLogEntry,
    pub reason: ReasonCode,
}

/// Error log backed by a plain text file
pub struct FileErrorLog {
    path: PathBuf,
    // Serializes appends from concurrent upload tasks.
    write_lock: Mutex<()>,
}

impl FileErrorLog {
    /// Creates a log writing to `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Formats one entry as a log line, without the trailing newline
    pub fn format_line(entry: &ErrorLogEntry) -> String {
        let detail = entry.detail.replace(['\r', '\n'], " ");
        [
            entry.timestamp.to_rfc3339(),
            entry.path.display().to_string(),
            ReasonCode::classify(&detail).to_string(),
            detail,
        ]
        .join(SEPARATOR)
    }

    /// Parses a single log line
    pub fn parse_line(line: &str, line_no: usize) -> Result<ErrorLogRecord, AuditError> {
        let malformed = |message: String| AuditError::Malformed {
            line: line_no,
            message,
        };

        let mut fields = line.splitn(4, SEPARATOR);
        let (Some(timestamp), Some(path), Some(reason), Some(detail)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("expected 4 fields".to_string()));
        };

        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| malformed(format!("bad timestamp '{timestamp}': {e}")))?
            .with_timezone(&Utc);
        let reason = reason.parse::<ReasonCode>().map_err(malformed)?;

        Ok(ErrorLogRecord {
            entry: ErrorLogEntry::new(path, timestamp, detail),
            reason,
        })
    }

    /// Reads every entry back, oldest first
    ///
    /// A missing file yields an empty list. Blank lines are skipped.
    pub async fn read_entries(&self) -> Result<Vec<ErrorLogRecord>, AuditError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuditError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| Self::parse_line(line, idx + 1))
            .collect()
    }

    async fn append_line(&self, line: &str) -> Result<(), AuditError> {
        let io_err = |source| AuditError::Io {
            path: self.path.clone(),
            source,
        };

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IErrorLog for FileErrorLog {
    async fn append(&self, entry: &ErrorLogEntry) -> anyhow::Result<()> {
        let line = Self::format_line(entry);
        self.append_line(&line).await?;
        debug!(path = %entry.path.display(), log = %self.path.display(), "Recorded upload failure");
        Ok(())
    }
}
