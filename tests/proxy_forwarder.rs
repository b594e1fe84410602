use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{CONNECTION, HOST, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use url::Url;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalog_downloader::common::models::CatalogEntry;
use catalog_downloader::downloader::{
    DownloadOrchestrator, OrchestratorOptions, ProgressEventBus, ProxyEndpointTransport, TaskStatus,
    Transport,
};
use catalog_downloader::proxy::forwarder::{outbound_headers, relay_headers};
use catalog_downloader::proxy::{BodyStream, ProxyError, ProxyForwarder, ProxyRequest};

fn forwarder() -> ProxyForwarder {
    ProxyForwarder::new(Client::new())
}

async fn collect(mut body: BodyStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn test_missing_or_invalid_target_is_rejected_locally() {
    let forwarder = forwarder();

    for url in [None, Some(""), Some("   "), Some("ftp://host/file"), Some("not a url")] {
        let request = ProxyRequest::new(url.map(str::to_string), Method::GET);
        let err = forwarder.forward(request).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest(_)), "{:?} -> {:?}", url, err);
        assert_eq!(err.kind(), "InvalidRequest");
    }
}

#[tokio::test]
async fn test_relays_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/setup.exe"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"MZ-binary-content".to_vec(), "application/octet-stream")
                .insert_header("content-disposition", "attachment; filename=\"setup.exe\""),
        )
        .mount(&server)
        .await;

    let response = forwarder()
        .forward(ProxyRequest::get(format!("{}/files/setup.exe", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type(), Some("application/octet-stream"));
    assert_eq!(
        response.content_disposition(),
        Some("attachment; filename=\"setup.exe\"")
    );
    assert_eq!(response.content_length(), Some(17));
    assert_eq!(collect(response.body).await, b"MZ-binary-content");
}

#[tokio::test]
async fn test_forwards_method_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/echo"))
        .and(header("x-catalog", "1"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let mut headers = HeaderMap::new();
    headers.insert("x-catalog", HeaderValue::from_static("1"));
    let request = ProxyRequest::new(Some(format!("{}/api/echo", server.uri())), Method::POST)
        .with_headers(headers)
        .with_body("payload");

    let response = forwarder().forward(request).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(collect(response.body).await, b"created");
}

#[tokio::test]
async fn test_non_success_status_becomes_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = forwarder()
        .forward(ProxyRequest::get(format!("{}/missing", server.uri())))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.kind(), "UpstreamError");
}

#[tokio::test]
async fn test_unreachable_upstream_has_no_status() {
    let err = forwarder()
        .forward(ProxyRequest::get("http://127.0.0.1:1/unreachable"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::Upstream { status: None, .. }), "{:?}", err);
}

#[test]
fn test_outbound_headers_rewrite_host_and_drop_hop_by_hop() {
    let mut inbound = HeaderMap::new();
    inbound.insert(HOST, HeaderValue::from_static("localhost:3030"));
    inbound.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    inbound.insert("x-token", HeaderValue::from_static("abc"));

    let target = Url::parse("https://cdn.example.org:8443/a.exe").unwrap();
    let outbound = outbound_headers(&inbound, &target);

    assert_eq!(outbound.get(HOST).unwrap(), "cdn.example.org:8443");
    assert!(outbound.get(CONNECTION).is_none());
    assert_eq!(outbound.get("x-token").unwrap(), "abc");

    let mut upstream = HeaderMap::new();
    upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
    upstream.insert("content-type", HeaderValue::from_static("text/plain"));
    let relayed = relay_headers(&upstream);
    assert!(relayed.get("transfer-encoding").is_none());
    assert_eq!(relayed.get("content-type").unwrap(), "text/plain");
}

#[tokio::test]
async fn test_proxy_endpoint_transport_wraps_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/proxy"))
        .and(query_param("url", "https://origin.example/a.exe"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"via-proxy".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = format!("{}/api/proxy", server.uri());
    let transport = ProxyEndpointTransport::new(Client::new(), &endpoint).unwrap();
    assert_eq!(transport.name(), "proxy-endpoint");
    assert_eq!(
        transport.request_url("https://origin.example/a.exe").query(),
        Some("url=https%3A%2F%2Forigin.example%2Fa.exe")
    );

    let response = transport.open("https://origin.example/a.exe").await.unwrap();
    assert_eq!(collect(response.body).await, b"via-proxy");
}

#[tokio::test]
async fn test_proxy_endpoint_transport_validates_before_sending() {
    let server = MockServer::start().await;
    let transport = ProxyEndpointTransport::new(Client::new(), &format!("{}/api/proxy", server.uri())).unwrap();

    let err = transport.open("").await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidRequest(_)));
    assert!(server.received_requests().await.unwrap().is_empty());

    assert!(ProxyEndpointTransport::new(Client::new(), "::not-an-endpoint").is_err());
}

#[tokio::test]
async fn test_orchestrator_over_http_uses_fallback_on_404() {
    let server = MockServer::start().await;
    Mock::given(path("/mirror/tool.zip"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/origin/tool.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let orchestrator = DownloadOrchestrator::new(
        Arc::new(forwarder()) as Arc<dyn Transport>,
        ProgressEventBus::new(),
        OrchestratorOptions {
            output_dir: dir.path().to_path_buf(),
            max_concurrent: 2,
            idle_timeout: Some(Duration::from_secs(5)),
            progress_interval: Duration::ZERO,
        },
    );

    let entry = CatalogEntry::new("tool", "Tool", format!("{}/mirror/tool.zip", server.uri()))
        .with_original_url(format!("{}/origin/tool.zip", server.uri()));
    let task_id = orchestrator.create_task(&entry);

    let last = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait(&task_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(last.status, TaskStatus::Completed);
    assert!(last.used_fallback);
    assert_eq!(last.downloaded_bytes, 4096);
    assert_eq!(last.total_bytes, 4096);
    assert_eq!(std::fs::read(dir.path().join("tool.zip")).unwrap(), vec![7u8; 4096]);
}
