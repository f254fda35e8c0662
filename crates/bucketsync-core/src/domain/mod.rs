//! Domain entities and business rules
//!
//! - Watch entries (named, persisted directories)
//! - Transfer status, snapshots and upload errors
//! - Domain-specific error types

pub mod errors;
pub mod transfer;
pub mod watch_entry;

pub use errors::DomainError;
pub use transfer::{object_key, TransferStatus, TransferTemplate, UploadError};
pub use watch_entry::{canonical_watch_path, WatchEntry};
