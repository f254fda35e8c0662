//! BucketSync Audit - error log for failed transfers
//!
//! Provides:
//! - `FileErrorLog`: append-only text file implementing `IErrorLog`
//! - `ReasonCode`: coarse categories for why an upload failed

pub mod error_log;
pub mod reason;

pub use error_log::{ErrorLogRecord, FileErrorLog};
pub use reason::ReasonCode;

use thiserror::Error;

/// Errors raised while reading or writing the error log file
#[derive(Debug, Error)]
pub enum AuditError {
    /// The log file could not be opened, written or read
    #[error("Error log I/O on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line did not match `<timestamp> | <path> | <reason> | <detail>`
    #[error("Malformed error log line {line}: {message}")]
    Malformed { line: usize, message: String },
}
