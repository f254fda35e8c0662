//! Shared helpers for S3 integration tests
//!
//! Provides a wiremock server addressed as a path-style S3 endpoint and
//! temporary files to upload.

use std::path::PathBuf;

use bucketsync_core::config::CredentialsConfig;
use bucketsync_s3::S3ObjectStore;
use wiremock::MockServer;

/// Bucket used by every test
pub const BUCKET: &str = "backups";

/// Starts a mock server and returns a store pointed at it.
pub async fn setup_s3_mock() -> (MockServer, S3ObjectStore) {
    let server = MockServer::start().await;
    let credentials = CredentialsConfig {
        bucket: BUCKET.to_string(),
        region: "us-east-1".to_string(),
        access_key_id: "AKIATEST".to_string(),
        secret_access_key: "test-secret".to_string(),
        endpoint: Some(server.uri()),
    };
    let store = S3ObjectStore::new(&credentials).expect("store for mock endpoint");
    (server, store)
}

/// Writes `content` to a fresh temporary file.
pub fn temp_file(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("upload.bin");
    std::fs::write(&path, content).expect("write temp file");
    (dir, path)
}

/// S3 XML error body
pub fn error_body(code: &str, message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{code}</Code><Message>{message}</Message><RequestId>test</RequestId></Error>"
    )
}
