//! PutObject against the mock endpoint

use bucketsync_core::ports::IObjectStore;
use bucketsync_s3::S3Error;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use crate::common;

#[tokio::test]
async fn test_put_sends_path_style_request() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .and(path("/backups/home/ana/notes.txt"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc123\""))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, file) = common::temp_file(b"meeting notes");
    store
        .upload_file(common::BUCKET, "home/ana/notes.txt", &file)
        .await
        .expect("upload should succeed");

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_put_through_port_trait() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .and(path("/backups/a/f.txt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, file) = common::temp_file(b"x");
    let port: &dyn IObjectStore = &store;
    port.put(common::BUCKET, "a/f.txt", &file)
        .await
        .expect("upload should succeed");
}

#[tokio::test]
async fn test_access_denied_is_forbidden() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("Content-Type", "application/xml")
                .set_body_string(common::error_body("AccessDenied", "Access Denied")),
        )
        .mount(&server)
        .await;

    let (_dir, file) = common::temp_file(b"secret");
    let err = store
        .upload_file(common::BUCKET, "b/g.txt", &file)
        .await
        .unwrap_err();

    assert!(matches!(err, S3Error::Forbidden(_)), "{err}");
    assert!(err.to_string().contains("AccessDenied"));
}

#[tokio::test]
async fn test_missing_bucket_is_not_found() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("Content-Type", "application/xml")
                .set_body_string(common::error_body(
                    "NoSuchBucket",
                    "The specified bucket does not exist",
                )),
        )
        .mount(&server)
        .await;

    let (_dir, file) = common::temp_file(b"data");
    let err = store
        .upload_file(common::BUCKET, "c/h.txt", &file)
        .await
        .unwrap_err();

    assert!(matches!(err, S3Error::NotFound(_)), "{err}");
}

#[tokio::test]
async fn test_bad_signature_is_unauthorized() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("Content-Type", "application/xml")
                .set_body_string(common::error_body(
                    "SignatureDoesNotMatch",
                    "The request signature we calculated does not match",
                )),
        )
        .mount(&server)
        .await;

    let (_dir, file) = common::temp_file(b"data");
    let err = store
        .upload_file(common::BUCKET, "c/h.txt", &file)
        .await
        .unwrap_err();

    assert!(matches!(err, S3Error::Unauthorized(_)), "{err}");
}
