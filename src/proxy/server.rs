//! 同源 HTTP 接口：代理转发、健康检查、下载任务管理。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::error::ProxyError;
use super::forwarder::{ProxyForwarder, ProxyRequest, ProxyResponse};
use crate::common::models::CatalogEntry;
use crate::downloader::{DownloadError, DownloadOrchestrator, ProgressDisplay, ProgressEvent, TaskId};

/// 入站请求体上限，只约束请求体，响应体始终流式转发
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub forwarder: ProxyForwarder,
    pub orchestrator: DownloadOrchestrator,
    started_at: Arc<Instant>,
}

impl AppState {
    pub fn new(forwarder: ProxyForwarder, orchestrator: DownloadOrchestrator) -> Self {
        Self {
            forwarder,
            orchestrator,
            started_at: Arc::new(Instant::now()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/proxy", any(proxy))
        .route("/api/health", get(health))
        .route("/api/downloads", get(list_downloads).post(create_download))
        .route(
            "/api/downloads/{id}",
            get(get_download).delete(cancel_download),
        )
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 代理服务已启动: http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到退出信号，正在关闭服务");
        })
        .await?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// 代理转发

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

// 请求体形式：没有 url 查询参数时，从 JSON 请求体读取
#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    url: Option<String>,
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    body: Option<String>,
}

async fn proxy(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let request = match build_proxy_request(query, method, headers, body).await {
        Ok(request) => request,
        Err(e) => {
            warn!("代理请求无效: {}", e);
            return e.into_response();
        }
    };

    match state.forwarder.forward(request).await {
        Ok(response) => relay(response),
        Err(e) => e.into_response(),
    }
}

async fn build_proxy_request(
    query: ProxyQuery,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<ProxyRequest, ProxyError> {
    if query.url.is_some() {
        let mut request = ProxyRequest::new(query.url, method.clone()).with_headers(headers);
        if !matches!(method, Method::GET | Method::HEAD) {
            request = request.with_body(read_body(body).await?);
        }
        return Ok(request);
    }

    if method == Method::POST && is_json(&headers) {
        let bytes = read_body(body).await?;
        let envelope: ProxyEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| ProxyError::InvalidRequest(format!("请求体不是有效的 JSON: {}", e)))?;
        return envelope_request(envelope);
    }

    Err(ProxyError::InvalidRequest("缺少 url 参数".to_string()))
}

fn envelope_request(envelope: ProxyEnvelope) -> Result<ProxyRequest, ProxyError> {
    let method = match envelope.method.as_deref() {
        Some(m) => Method::from_bytes(m.trim().to_uppercase().as_bytes())
            .map_err(|_| ProxyError::InvalidRequest(format!("无效的请求方法: {}", m)))?,
        None => Method::GET,
    };

    let mut headers = HeaderMap::new();
    for (name, value) in &envelope.headers {
        // 非法头部直接忽略
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!("忽略非法请求头: {}", name),
        }
    }

    let mut request = ProxyRequest::new(envelope.url, method).with_headers(headers);
    if let Some(body) = envelope.body {
        request = request.with_body(body);
    }
    Ok(request)
}

async fn read_body(body: Body) -> Result<Bytes, ProxyError> {
    axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("读取请求体失败: {}", e)))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

// 上游状态码和头部原样回传，响应体边收边发
fn relay(upstream: ProxyResponse) -> Response {
    let mut response = Response::new(Body::from_stream(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

// ------------------------------------------------------------------------------------------------
// 健康检查

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "activeTasks": state.orchestrator.active_count(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

// ------------------------------------------------------------------------------------------------
// 下载任务

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadView {
    #[serde(flatten)]
    event: ProgressEvent,
    display: ProgressDisplay,
}

impl From<ProgressEvent> for DownloadView {
    fn from(event: ProgressEvent) -> Self {
        let display = event.display();
        Self { event, display }
    }
}

async fn create_download(
    State(state): State<AppState>,
    Json(entry): Json<CatalogEntry>,
) -> impl IntoResponse {
    let task_id = state.orchestrator.create_task(&entry);
    info!("通过接口创建下载任务: {} ({})", task_id, entry.name);
    (StatusCode::ACCEPTED, Json(json!({ "taskId": task_id })))
}

async fn list_downloads(State(state): State<AppState>) -> impl IntoResponse {
    let views: Vec<DownloadView> = state
        .orchestrator
        .list()
        .into_iter()
        .map(DownloadView::from)
        .collect();
    Json(views)
}

async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DownloadView>, DownloadError> {
    let task_id = parse_task_id(&id)?;
    state
        .orchestrator
        .snapshot(&task_id)
        .map(|event| Json(DownloadView::from(event)))
        .ok_or(DownloadError::TaskNotFound(id))
}

async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, DownloadError> {
    let task_id = parse_task_id(&id)?;
    state.orchestrator.cancel_task(&task_id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_task_id(id: &str) -> Result<TaskId, DownloadError> {
    TaskId::parse(id).ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        match self {
            DownloadError::Proxy(e) => e.into_response(),
            DownloadError::TaskNotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "TaskNotFound", "message": self.to_string() })),
            )
                .into_response(),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal", "message": other.to_string() })),
            )
                .into_response(),
        }
    }
}
