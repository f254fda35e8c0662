//! Integration tests for bucketsync-s3
//!
//! Uses wiremock to stand in for an S3-compatible endpoint and verifies
//! request routing and error classification of the SDK-backed store.

mod common;

mod test_put_object;
