//! HTTP-level tests of the proxy routes

mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::Router;
use common::*;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use vkaudio::{AudioItem, Downloader, VkCache, VkClient, VkSession, VkState, create_router};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Proxy {
    router: Router,
    cache: VkCache,
    _dir: tempfile::TempDir,
}

fn proxy(server: &MockServer) -> Proxy {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(server, dir.path());
    let session = Arc::new(VkSession::new(&settings.session, LOGIN, PASSWORD).unwrap());
    let cache = VkCache::new(&settings.cache);
    let downloader = Arc::new(Downloader::new(cache.clone(), &settings).unwrap());
    let client = Arc::new(VkClient::new(session, cache.clone(), &settings));

    let router = create_router(VkState {
        client,
        downloader,
        public_base_url: None,
    });
    Proxy {
        router,
        cache,
        _dir: dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "proxy.local")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_negative_page_is_rejected() {
    let server = MockServer::start().await;
    let proxy = proxy(&server);

    let (status, body) = send_json(&proxy.router, get("/search?q=Coldplay&page=-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], 400);
    assert_eq!(body["error"], "'page' must be a non-negative integer");
}

#[tokio::test]
async fn test_search_without_session_is_unauthorized() {
    let server = MockServer::start().await;
    let proxy = proxy(&server);

    let (status, body) = send_json(&proxy.router, get("/search?q=Coldplay")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], 401);
}

#[tokio::test]
async fn test_auth_then_search() {
    let server = MockServer::start().await;
    mount_successful_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/audio"))
        .respond_with(html(&authenticated_page(&listing_item(
            "2000_3",
            "Coldplay",
            "Viva La Vida",
            242,
            CAESAR_SAMPLE,
        ))))
        .mount(&server)
        .await;
    let proxy = proxy(&server);

    let (status, body) = send_json(&proxy.router, post_json("/_auth", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "authenticated");

    let (status, body) = send_json(&proxy.router, get("/search?q=Coldplay&page=0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "Viva La Vida");
    assert!(items[0]["download_url"]
        .as_str()
        .unwrap()
        .starts_with("http://proxy.local/dl/4fe42a16/"));
    assert!(items[0].get("mp3").is_none());
}

#[tokio::test]
async fn test_second_factor_over_http() {
    let server = MockServer::start().await;
    mount_login(&server, html(&security_check_page(None))).await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(html(&authenticated_page("")))
        .mount(&server)
        .await;
    let proxy = proxy(&server);

    let (status, body) =
        send_json(&proxy.router, post_json("/_auth_second_factor", serde_json::json!({"code": "1"})))
            .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], 409);

    let (status, body) = send_json(&proxy.router, post_json("/_auth", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "challenge_required");
    assert_eq!(body["fields"], serde_json::json!(["code"]));

    let (status, body) = send_json(
        &proxy.router,
        post_json("/_auth_second_factor", serde_json::json!({"code": "4242"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "authenticated");
}

#[tokio::test]
async fn test_captcha_error_exposes_token() {
    let server = MockServer::start().await;
    mount_successful_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/audio"))
        .respond_with(html(&authenticated_page(
            r#"<img src="/captcha.php?sid=77"/><input type="hidden" name="captcha_sid" value="77"/>"#,
        )))
        .mount(&server)
        .await;
    let proxy = proxy(&server);
    send(&proxy.router, post_json("/_auth", Value::Null)).await;

    let (status, body) = send_json(&proxy.router, get("/search?q=Coldplay")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["captcha_sid"], "77");
    assert_eq!(body["captcha_img"], "/captcha.php?sid=77");
}

#[tokio::test]
async fn test_download_and_stream_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/viva.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(mp3_payload()))
        .expect(1)
        .mount(&server)
        .await;
    let proxy = proxy(&server);
    proxy
        .cache
        .put_search(
            "4fe42a16".to_string(),
            vec![AudioItem {
                id: "7d1e2f30".to_string(),
                artist: "Кино".to_string(),
                title: "Группа крови".to_string(),
                duration: 285,
                mp3: format!("{}/media/viva.mp3", server.uri()),
                user_id: None,
            }],
        )
        .await;

    let (status, headers, body) = send(&proxy.router, get("/dl/4fe42a16/7d1e2f30")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(headers[header::CACHE_CONTROL], "private");
    assert_eq!(
        headers[header::CONTENT_LENGTH].to_str().unwrap(),
        body.len().to_string()
    );
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\""));
    assert!(disposition.contains("filename*=UTF-8''%D0%9A%D0%B8%D0%BD%D0%BE"));

    let (status, headers, streamed) = send(&proxy.router, get("/stream/4fe42a16/7d1e2f30")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get(header::CONTENT_LENGTH).is_none());
    assert_eq!(streamed, body);
}

#[tokio::test]
async fn test_unknown_track_is_not_found() {
    let server = MockServer::start().await;
    let proxy = proxy(&server);

    let (status, body) = send_json(&proxy.router, get("/dl/nokey/noid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 404);
}

#[tokio::test]
async fn test_upstream_failure_hides_media_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/secret-upstream-path.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let proxy = proxy(&server);
    proxy
        .cache
        .put_search(
            "4fe42a16".to_string(),
            vec![AudioItem {
                id: "7d1e2f30".to_string(),
                artist: "Coldplay".to_string(),
                title: "Yellow".to_string(),
                duration: 269,
                mp3: format!("{}/media/secret-upstream-path.mp3", server.uri()),
                user_id: None,
            }],
        )
        .await;

    let (status, _, body) = send(&proxy.router, get("/dl/4fe42a16/7d1e2f30")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let text = String::from_utf8(body).unwrap();
    assert!(!text.contains("secret-upstream-path"));
    assert!(!text.contains(&server.uri()));

    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["error_code"], 502);
    assert_eq!(body["error"], "Upstream transfer failed");
}
