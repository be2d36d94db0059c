//! Router-level tests for the download generator and upload receiver.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use speedprobe::api::{router, state::AppState};
use speedprobe::config::ServerConfig;

const BOUNDARY: &str = "X-SPEEDPROBE-BOUNDARY";

fn app() -> Router {
    router(AppState::new(ServerConfig::default()))
}

fn app_with(max_download_size: u64, max_upload_size: u64) -> Router {
    router(AppState::new(ServerConfig {
        default_download_size: max_download_size.min(5 * 1024 * 1024),
        max_download_size,
        max_upload_size,
        ..ServerConfig::default()
    }))
}

async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 200 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"payload.bin\"\r\nContent-Type: {ct}\r\n\r\n",
        b = BOUNDARY,
        f = field,
        ct = content_type
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/network-test/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_download_exact_length() {
    for size in [1u64, 1023, 65_536, 65_537, 1_000_003] {
        let response = get(app(), &format!("/network-test/download?size={}", size)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-length"].to_str().unwrap(),
            size.to_string()
        );
        let body = body_bytes(response).await;
        assert_eq!(body.len() as u64, size, "size {size}");
    }
}

#[tokio::test]
async fn test_download_headers_forbid_caching() {
    let response = get(app(), "/network-test/download?size=16").await;
    let headers = response.headers();
    assert_eq!(headers["content-type"], "application/octet-stream");
    let cache = headers["cache-control"].to_str().unwrap();
    assert!(cache.contains("no-store"));
    assert!(cache.contains("no-cache"));
}

#[tokio::test]
async fn test_download_default_size() {
    let response = get(app(), "/network-test/download").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), 5 * 1024 * 1024);
}

#[tokio::test]
async fn test_download_invalid_size_is_400() {
    for raw in ["0", "-5", "abc", "2.5"] {
        let response = get(app(), &format!("/network-test/download?size={}", raw)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "size={raw}");
        let json = body_json(response).await;
        assert_eq!(json["kind"], "invalid_parameter");
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn test_download_undecodable_query_is_json_400() {
    let response = get(app(), "/network-test/download?size=1&size=2").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    let json = body_json(response).await;
    assert_eq!(json["kind"], "invalid_parameter");
    assert!(json["error"].as_str().unwrap().contains("size"));
}

#[tokio::test]
async fn test_download_above_max_is_400() {
    let response = get(app_with(1024, 1024), "/network-test/download?size=1025").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["kind"], "payload_too_large");

    let response = get(app_with(1024, 1024), "/network-test/download?size=1024").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_consecutive_downloads_differ() {
    let a = body_bytes(get(app(), "/network-test/download?size=4096").await).await;
    let b = body_bytes(get(app(), "/network-test/download?size=4096").await).await;
    assert_eq!(a.len(), b.len());
    assert_ne!(a, b);
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_upload_reports_size_and_type() {
    let data = vec![0xA5u8; 300_000];
    let response = app()
        .oneshot(upload_request(multipart_body("file", "video/mp4", &data)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["size"], 300_000);
    assert_eq!(json["type"], "video/mp4");
}

#[tokio::test]
async fn test_upload_above_framework_default_limit() {
    // Larger than axum's 2 MB default body limit.
    let data = vec![1u8; 3 * 1024 * 1024];
    let response = app()
        .oneshot(upload_request(multipart_body("file", "application/octet-stream", &data)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["size"], 3 * 1024 * 1024);
}

#[tokio::test]
async fn test_upload_missing_file_is_400() {
    let response = app()
        .oneshot(upload_request(multipart_body("attachment", "text/plain", b"hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].is_string());
    assert_eq!(json["kind"], "missing_payload");
}

#[tokio::test]
async fn test_upload_not_multipart_is_400() {
    let request = Request::builder()
        .method("POST")
        .uri("/network-test/upload")
        .header("content-type", "application/octet-stream")
        .body(Body::from(vec![0u8; 64]))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_over_limit_is_413() {
    let data = vec![0u8; 4096];
    let response = app_with(1024, 1024)
        .oneshot(upload_request(multipart_body("file", "text/plain", &data)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["kind"], "payload_too_large");
}

#[tokio::test]
async fn test_upload_exactly_at_limit_with_content_length() {
    let data = vec![3u8; 1024];
    let response = app_with(1024, 1024)
        .oneshot(upload_request(multipart_body("file", "application/octet-stream", &data)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["size"], 1024);
}

#[tokio::test]
async fn test_upload_exactly_at_limit_without_content_length() {
    let data = vec![3u8; 1024];
    let body = multipart_body("file", "application/octet-stream", &data);
    let chunks = futures::stream::iter(
        body.chunks(100)
            .map(|c| Ok::<_, std::convert::Infallible>(c.to_vec()))
            .collect::<Vec<_>>(),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/network-test/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from_stream(chunks))
        .unwrap();
    let response = app_with(1024, 1024).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["size"], 1024);
}

#[tokio::test]
async fn test_upload_one_byte_over_limit_is_413() {
    let data = vec![3u8; 1025];
    let response = app_with(1024, 1024)
        .oneshot(upload_request(multipart_body("file", "application/octet-stream", &data)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_upload_declared_length_far_over_limit_is_413() {
    // Declared size alone is enough; the body is never read.
    let request = Request::builder()
        .method("POST")
        .uri("/network-test/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header("content-length", 10 * 1024 * 1024)
        .body(Body::empty())
        .unwrap();
    let response = app_with(1024, 1024).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_upload_truncated_is_500() {
    let mut body = multipart_body("file", "text/plain", &[7u8; 100]);
    // Drop the closing boundary.
    body.truncate(body.len() - BOUNDARY.len() - 8);
    let response = app().oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["kind"], "malformed_transfer");
}
