//! Object store port (driven/secondary port)
//!
//! Interface to the remote storage service that changed files are uploaded
//! to. The production adapter targets Amazon S3 and S3-compatible services
//! through the AWS SDK, but the coordinator only depends on this trait.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because transport errors are adapter-specific;
//!   the coordinator flattens them into an error-log detail string.
//! - The store reads the file itself so adapters can stream large files
//!   instead of buffering them.
//! - Credentials changes rebuild the store through [`IObjectStoreFactory`];
//!   existing `Arc` handles held by in-flight uploads stay valid.

use std::path::Path;
use std::sync::Arc;

use crate::config::CredentialsConfig;

/// Port trait for uploading files to an object store
#[async_trait::async_trait]
pub trait IObjectStore: Send + Sync {
    /// Uploads the file at `file` to `bucket` under `key`
    ///
    /// # Errors
    /// Returns an error on read failures, network failures, rejected
    /// credentials or missing permissions.
    async fn put(&self, bucket: &str, key: &str, file: &Path) -> anyhow::Result<()>;
}

/// Builds object-store clients from credentials
pub trait IObjectStoreFactory: Send + Sync {
    /// Creates a client for the given credentials
    ///
    /// # Errors
    /// Returns an error if the credentials cannot be turned into a client
    /// (for example an unparsable endpoint URL).
    fn connect(&self, credentials: &CredentialsConfig) -> anyhow::Result<Arc<dyn IObjectStore>>;
}
