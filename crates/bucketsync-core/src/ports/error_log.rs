//! Error log port (driven/secondary port)
//!
//! Append-only sink for failed transfers. Every upload that ends in
//! `Error` status produces exactly one entry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UploadError;

/// One failed transfer as recorded in the error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    /// File whose upload failed
    pub path: PathBuf,
    /// When the failure was observed
    pub timestamp: DateTime<Utc>,
    /// Error detail reported by the object-store client
    pub detail: String,
}

impl ErrorLogEntry {
    pub fn new(path: impl Into<PathBuf>, timestamp: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            timestamp,
            detail: detail.into(),
        }
    }
}

impl From<&UploadError> for ErrorLogEntry {
    fn from(err: &UploadError) -> Self {
        Self::new(err.path.clone(), Utc::now(), err.detail.clone())
    }
}

/// Port trait for the append-only error log
///
/// Implementations format the entry as text. Callers treat failures to
/// append as non-fatal and only log them.
#[async_trait::async_trait]
pub trait IErrorLog: Send + Sync {
    /// Appends one entry
    async fn append(&self, entry: &ErrorLogEntry) -> anyhow::Result<()>;
}
