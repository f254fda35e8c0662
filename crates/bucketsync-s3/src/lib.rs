//! BucketSync S3 - object-store adapter for Amazon S3 and compatibles
//!
//! Provides:
//! - [`S3ObjectStore`], the `IObjectStore` implementation built on
//!   `aws-sdk-s3`
//! - [`S3StoreFactory`], which builds stores from configured credentials
//!
//! Custom endpoints (MinIO, Cloudflare R2, Backblaze B2, ...) are
//! addressed path-style.
//!
//! ## Modules
//!
//! - [`client`] - SDK client construction and uploads

pub mod client;

pub use client::{S3ObjectStore, S3StoreFactory};

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum S3Error {
    /// The configured endpoint is not an http(s) URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The local file could not be opened for streaming
    #[error("Cannot read {}: {detail}", path.display())]
    Io {
        /// File that was being uploaded
        path: PathBuf,
        /// Underlying error text
        detail: String,
    },

    /// The access key or signature was rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The credentials lack permission for the bucket or key
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The bucket does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The service asked the client to slow down
    #[error("Throttled: {0}")]
    Throttled(String),

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// The request never reached the service or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Anything the classification does not recognize
    #[error("S3 error: {0}")]
    Other(String),
}

impl S3Error {
    /// Maps an S3 error code and HTTP status onto an error variant
    ///
    /// `code` is the `<Code>` element of the error response, when the
    /// service sent one.
    pub fn from_service(code: Option<&str>, status: Option<u16>, message: String) -> Self {
        match (code, status) {
            (
                Some(
                    "InvalidAccessKeyId"
                    | "SignatureDoesNotMatch"
                    | "ExpiredToken"
                    | "InvalidToken"
                    | "AuthorizationHeaderMalformed",
                ),
                _,
            )
            | (None, Some(401)) => S3Error::Unauthorized(message),
            (Some("AccessDenied" | "AllAccessDisabled"), _) | (None, Some(403)) => {
                S3Error::Forbidden(message)
            }
            (Some("NoSuchBucket" | "NoSuchKey"), _) | (None, Some(404)) => {
                S3Error::NotFound(message)
            }
            (Some("SlowDown" | "Throttling" | "RequestLimitExceeded"), _) | (_, Some(429)) => {
                S3Error::Throttled(message)
            }
            (Some("InternalError" | "ServiceUnavailable"), _) => S3Error::ServerError(message),
            (_, Some(status)) if status >= 500 => S3Error::ServerError(message),
            _ => S3Error::Other(message),
        }
    }
}
