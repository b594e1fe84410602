#![cfg(feature = "http")]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalog_downloader::downloader::{
    DownloadOrchestrator, OrchestratorOptions, ProgressEventBus, TaskId, TaskStatus, Transport,
};
use catalog_downloader::proxy::ProxyForwarder;
use catalog_downloader::proxy::server::{AppState, router};

fn app() -> (Router, AppState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let forwarder = ProxyForwarder::new(reqwest::Client::new());
    let orchestrator = DownloadOrchestrator::new(
        Arc::new(forwarder.clone()) as Arc<dyn Transport>,
        ProgressEventBus::new(),
        OrchestratorOptions {
            output_dir: dir.path().to_path_buf(),
            max_concurrent: 2,
            idle_timeout: Some(Duration::from_secs(5)),
            progress_interval: Duration::ZERO,
        },
    );
    let state = AppState::new(forwarder, orchestrator);
    (router(state.clone()), state, dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn read_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&read_body(response).await).unwrap()
}

fn proxy_uri(target: &str) -> String {
    format!("/api/proxy?url={}", urlencoding::encode(target))
}

#[tokio::test]
async fn test_health() {
    let (app, _, _dir) = app();
    let response = app.oneshot(get("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeTasks"], 0);
}

#[tokio::test]
async fn test_proxy_without_url_is_bad_request() {
    let (app, _, _dir) = app();
    let response = app.oneshot(get("/api/proxy")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "InvalidRequest");

    // JSON 请求体里同样缺少 url
    let (app, _, _dir) = self::app();
    let response = app
        .oneshot(post_json("/api/proxy", json!({ "method": "GET" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_proxy_query_relays_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalog.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"apps":[]}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let (app, _, _dir) = app();
    let target = format!("{}/catalog.json", server.uri());
    let response = app.oneshot(get(&proxy_uri(&target))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(read_body(response).await, br#"{"apps":[]}"#);
}

#[tokio::test]
async fn test_proxy_mirrors_upstream_error_status() {
    let server = MockServer::start().await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (app, _, _dir) = app();
    let target = format!("{}/gone", server.uri());
    let response = app.oneshot(get(&proxy_uri(&target))).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["error"], "UpstreamError");
}

#[tokio::test]
async fn test_proxy_envelope_forwards_method_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/upload"))
        .and(header("x-client", "catalog"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&server)
        .await;

    let (app, _, _dir) = app();
    let envelope = json!({
        "url": format!("{}/upload", server.uri()),
        "method": "put",
        "headers": { "x-client": "catalog" },
        "body": "hello",
    });
    let response = app.oneshot(post_json("/api/proxy", envelope)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, b"stored");
}

#[tokio::test]
async fn test_download_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(path("/files/app.exe"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 2048]))
        .mount(&server)
        .await;

    let (app, state, dir) = app();
    let entry = json!({
        "id": "app",
        "name": "App",
        "downloadUrl": format!("{}/files/app.exe", server.uri()),
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/downloads", entry))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = read_json(response).await;
    let id = body["taskId"].as_str().unwrap().to_string();
    let task_id = TaskId::parse(&id).unwrap();

    let last = tokio::time::timeout(Duration::from_secs(10), state.orchestrator.wait(&task_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.status, TaskStatus::Completed);
    assert!(dir.path().join("app.exe").exists());

    let response = app
        .clone()
        .oneshot(get(&format!("/api/downloads/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = read_json(response).await;
    assert_eq!(view["status"], "Completed");
    assert_eq!(view["downloadedBytes"], 2048);
    assert_eq!(view["display"]["percentage"], 100.0);

    let response = app.clone().oneshot(get("/api/downloads")).await.unwrap();
    let list = read_json(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    // 已完成的任务取消是空操作
    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/downloads/{}", id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(state.orchestrator.get_task_status(&task_id), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_unknown_download_is_not_found() {
    let (app, _, _dir) = app();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/downloads/{}", TaskId::new())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/api/downloads/not-a-task")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/downloads/{}", TaskId::new()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["error"], "TaskNotFound");
}
