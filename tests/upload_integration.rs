//! Integration tests for resumable chunked uploads.

mod support;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use kwapi_core::{Error, ProtocolError, TransferMonitor};
use serde_json::json;
use support::{CaptureSink, session_for};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn record(total_size: u64, total_chunks: u64, uploaded_chunks: u64, uploaded_size: u64) -> serde_json::Value {
    json!({"data": [{
        "id": 77,
        "totalSize": total_size,
        "totalChunks": total_chunks,
        "uploadedChunks": uploaded_chunks,
        "uploadedSize": uploaded_size,
        "finished": false,
        "uri": "rest/uploads/77"
    }]})
}

async fn mount_record(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/rest/uploads"))
        .and(query_param("locate_id", "77"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn chunk_posts(requests: &[Request]) -> Vec<&Request> {
    requests
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/uploads/77")
        .collect()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Multipart field value as it appears on the wire.
fn field(name: &str, value: &str) -> Vec<u8> {
    format!("name=\"{name}\"\r\n\r\n{value}\r\n").into_bytes()
}

fn source(len: usize) -> Cursor<Vec<u8>> {
    Cursor::new((0..len).map(|i| b'a' + (i % 26) as u8).collect())
}

// ==================== Resume ====================

#[tokio::test]
async fn test_resume_sends_only_the_remaining_chunk() {
    let server = MockServer::start().await;
    mount_record(&server, record(40, 4, 3, 30)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .and(query_param("returnEntity", "true"))
        .and(query_param("mode", "full"))
        .and(header("x-accellion-version", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 501})))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let data = source(40);
    let tail = data.get_ref()[30..].to_vec();
    let file_id = session
        .upload("a.bin", 77, data, None)
        .await
        .expect("upload resumes");
    assert_eq!(file_id, 501);

    let requests = server.received_requests().await.expect("recording enabled");
    let posts = chunk_posts(&requests);
    assert_eq!(posts.len(), 1);
    let body = &posts[0].body;
    assert!(contains(body, &tail), "chunk must carry bytes 30..40");
    assert!(contains(body, &field("index", "4")));
    assert!(contains(body, &field("compressionSize", "10")));
    assert!(contains(body, &field("originalSize", "10")));
    assert!(contains(body, &field("compressionMode", "NORMAL")));
}

#[tokio::test]
async fn test_complete_upload_is_not_resubmitted() {
    let server = MockServer::start().await;
    mount_record(&server, record(40, 4, 4, 40)).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let id = session
        .upload("a.bin", 77, source(40), None)
        .await
        .expect("nothing to do");
    assert_eq!(id, 77);
}

#[tokio::test]
async fn test_unknown_upload_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/uploads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let error = session
        .upload("a.bin", 77, source(4), None)
        .await
        .expect_err("no such upload");
    assert!(matches!(
        error,
        Error::Protocol(ProtocolError::UploadIdNotFound)
    ));
}

#[tokio::test]
async fn test_inconsistent_record_is_rejected() {
    let server = MockServer::start().await;
    mount_record(&server, record(40, 4, 6, 30)).await;

    let session = session_for(&server).await;
    let error = session
        .upload("a.bin", 77, source(40), None)
        .await
        .expect_err("more chunks than exist");
    assert!(matches!(
        error,
        Error::Protocol(ProtocolError::InconsistentUploadRecord { .. })
    ));
}

#[tokio::test]
async fn test_size_off_chunk_boundary_is_rejected_before_sending() {
    let server = MockServer::start().await;
    mount_record(&server, record(40, 4, 3, 35)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 12})))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let error = session
        .upload("a.bin", 77, source(40), None)
        .await
        .expect_err("three chunks of ten cannot hold 35 bytes");
    assert!(matches!(
        error,
        Error::Protocol(ProtocolError::InconsistentUploadRecord { .. })
    ));
}

// ==================== Chunk Submission ====================

#[tokio::test]
async fn test_multi_chunk_upload_reports_progress() {
    let server = MockServer::start().await;
    mount_record(&server, record(30, 3, 0, 0)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .and(query_param("mode", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 900})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let sink = Arc::new(CaptureSink::default());
    let monitor = TransferMonitor::with_tick(sink.clone(), Duration::from_millis(5));
    let session = session_for(&server).await;
    let id = session
        .upload("report.bin", 77, source(30), Some(&monitor))
        .await
        .expect("all chunks accepted");
    assert_eq!(id, 900);

    let requests = server.received_requests().await.expect("recording enabled");
    let posts = chunk_posts(&requests);
    assert_eq!(posts.len(), 3);
    let data = source(30).into_inner();
    for (i, post) in posts.iter().enumerate() {
        let start = i * 10;
        assert!(contains(&post.body, &data[start..start + 10]));
        assert!(contains(&post.body, &field("index", &(i + 1).to_string())));
    }
    assert!(posts[0].url.query().is_none());

    let logs = sink.logs.lock().expect("lock");
    assert_eq!(logs.len(), 1, "record closes exactly once");
    assert!(logs[0].contains("report.bin"));
    assert!(logs[0].contains("100%"));
}

#[tokio::test]
async fn test_retried_chunk_resends_same_bytes() {
    let server = MockServer::start().await;
    mount_record(&server, record(8, 1, 0, 0)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "errors": [{"code": "ERR_INTERNAL_SERVER_ERROR", "message": "Busy"}]
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 12})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "ref2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let id = session
        .upload("a.bin", 77, source(8), None)
        .await
        .expect("second attempt succeeds");
    assert_eq!(id, 12);

    let requests = server.received_requests().await.expect("recording enabled");
    let posts = chunk_posts(&requests);
    assert_eq!(posts.len(), 2);
    assert!(contains(&posts[0].body, b"abcdefgh"));
    assert!(contains(&posts[1].body, b"abcdefgh"));
}

#[tokio::test]
async fn test_empty_final_response_is_protocol_error() {
    let server = MockServer::start().await;
    mount_record(&server, record(5, 1, 0, 0)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let error = session
        .upload("a.bin", 77, source(5), None)
        .await
        .expect_err("no id returned");
    assert!(matches!(
        error,
        Error::Protocol(ProtocolError::EmptyUploadResponse)
    ));
}

#[tokio::test]
async fn test_zero_byte_upload_sends_one_chunk() {
    let server = MockServer::start().await;
    mount_record(&server, record(0, 1, 0, 0)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .and(query_param("returnEntity", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3})))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let id = session
        .upload("empty.txt", 77, source(0), None)
        .await
        .expect("empty upload");
    assert_eq!(id, 3);

    let requests = server.received_requests().await.expect("recording enabled");
    let posts = chunk_posts(&requests);
    assert!(contains(&posts[0].body, &field("originalSize", "0")));
}

#[tokio::test]
async fn test_short_source_fails_the_chunk() {
    let server = MockServer::start().await;
    mount_record(&server, record(20, 1, 0, 0)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3})))
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let result = session.upload("a.bin", 77, source(5), None).await;
    assert!(result.is_err(), "a truncated source cannot satisfy the chunk");
}

// ==================== Initiation ====================

#[tokio::test]
async fn test_new_upload_initiates_with_chunk_geometry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/folders/42/actions/initiateUpload"))
        .and(query_param("returnEntity", "true"))
        .and(header("x-accellion-version", "5"))
        .and(body_json(json!({"filename": "a.bin", "totalSize": 100, "totalChunks": 1})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 77})))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    let id = session.new_upload(42, "a.bin", 100).await.expect("initiated");
    assert_eq!(id, 77);
}

#[tokio::test]
async fn test_new_version_targets_the_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/files/8/actions/initiateUpload"))
        .and(header("x-accellion-version", "11"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 78})))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server).await;
    assert_eq!(session.new_version(8, "a.bin", 3).await.expect("initiated"), 78);
}

#[tokio::test]
async fn test_upload_file_from_disk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/folders/42/actions/initiateUpload"))
        .and(body_json(json!({"filename": "notes.txt", "totalSize": 11, "totalChunks": 1})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 77})))
        .expect(1)
        .mount(&server)
        .await;
    mount_record(&server, record(11, 1, 0, 0)).await;
    Mock::given(method("POST"))
        .and(path("/rest/uploads/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1234})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("temp dir");
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, b"hello world").expect("write source");

    let session = session_for(&server).await;
    let id = session
        .upload_file(42, &file, None)
        .await
        .expect("uploaded");
    assert_eq!(id, 1234);

    let requests = server.received_requests().await.expect("recording enabled");
    let posts = chunk_posts(&requests);
    assert!(contains(&posts[0].body, b"hello world"));
    assert!(contains(&posts[0].body, b"filename=\"notes.txt\""));
}

#[tokio::test]
async fn test_upload_file_missing_path() {
    let server = MockServer::start().await;
    let session = session_for(&server).await;
    let error = session
        .upload_file(42, std::path::Path::new("/nonexistent/kwapi/file.bin"), None)
        .await
        .expect_err("missing file");
    assert!(matches!(error, Error::Io { .. }));
}
