//! S3 client construction and uploads
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bucketsync_core::config::CredentialsConfig;
//! use bucketsync_core::ports::IObjectStoreFactory;
//! use bucketsync_s3::client::S3StoreFactory;
//!
//! # async fn example(credentials: CredentialsConfig) -> anyhow::Result<()> {
//! let store = S3StoreFactory.connect(&credentials)?;
//! store
//!     .put(&credentials.bucket, "home/ana/notes.txt", "/home/ana/notes.txt".as_ref())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bucketsync_core::config::CredentialsConfig;
use bucketsync_core::ports::{IObjectStore, IObjectStoreFactory};
use tracing::{debug, info};

use crate::S3Error;

/// Name reported by the static credentials provider
const CREDENTIALS_PROVIDER: &str = "bucketsync-config";

// ============================================================================
// S3ObjectStore
// ============================================================================

/// Object store backed by the AWS SDK S3 client
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Builds a client for `credentials`
    ///
    /// # Errors
    /// Returns `InvalidEndpoint` if a custom endpoint is not an http(s) URL.
    pub fn new(credentials: &CredentialsConfig) -> Result<Self, S3Error> {
        let static_credentials = Credentials::new(
            credentials.access_key_id.trim(),
            credentials.secret_access_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(credentials.region.trim().to_string()))
            .credentials_provider(static_credentials);

        if let Some(endpoint) = credentials.endpoint.as_deref() {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(S3Error::InvalidEndpoint(endpoint.to_string()));
            }
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            region = %credentials.region,
            endpoint = credentials.endpoint.as_deref().unwrap_or("aws"),
            "Created S3 client"
        );
        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Wraps an already configured SDK client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Streams `file` to `bucket/key`
    ///
    /// # Errors
    /// `Io` if the file cannot be opened; otherwise the classified service
    /// or transport error.
    pub async fn upload_file(&self, bucket: &str, key: &str, file: &Path) -> Result<(), S3Error> {
        let body = ByteStream::from_path(file).await.map_err(|e| S3Error::Io {
            path: file.to_path_buf(),
            detail: e.to_string(),
        })?;

        debug!(bucket, key, path = %file.display(), "PutObject");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(classify_put_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, file: &Path) -> anyhow::Result<()> {
        self.upload_file(bucket, key, file).await?;
        Ok(())
    }
}

fn classify_put_error(err: SdkError<PutObjectError, HttpResponse>) -> S3Error {
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            S3Error::Network(DisplayErrorContext(&err).to_string())
        }
        SdkError::ServiceError(_) | SdkError::ResponseError(_) => {
            let status = err.raw_response().map(|r| r.status().as_u16());
            let message = match (err.code(), err.message()) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (Some(code), None) => code.to_string(),
                _ => DisplayErrorContext(&err).to_string(),
            };
            S3Error::from_service(err.code(), status, message)
        }
        _ => S3Error::Other(DisplayErrorContext(&err).to_string()),
    }
}

// ============================================================================
// S3StoreFactory
// ============================================================================

/// Builds [`S3ObjectStore`] clients from configured credentials
#[derive(Debug, Default, Clone, Copy)]
pub struct S3StoreFactory;

impl IObjectStoreFactory for S3StoreFactory {
    fn connect(&self, credentials: &CredentialsConfig) -> anyhow::Result<Arc<dyn IObjectStore>> {
        Ok(Arc::new(S3ObjectStore::new(credentials)?))
    }
}
