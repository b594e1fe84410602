use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue,
};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::error::ProxyError;

/// 响应体字节流，逐块转发，不整体缓存
pub type BodyStream = BoxStream<'static, Result<Bytes, ProxyError>>;

// 逐跳头部，不能转发
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// 入站代理请求
pub struct ProxyRequest {
    pub url: Option<String>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<reqwest::Body>,
}

impl ProxyRequest {
    pub fn new(url: Option<String>, method: Method) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Some(url.into()), Method::GET)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.body = Some(body.into());
        self
    }
}

// 上游响应：状态码、可转发的头部、响应体流
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for ProxyResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl ProxyResponse {
    pub fn content_length(&self) -> Option<u64> {
        header_str(&self.headers, &CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        header_str(&self.headers, &CONTENT_TYPE)
    }

    pub fn content_disposition(&self) -> Option<&str> {
        header_str(&self.headers, &CONTENT_DISPOSITION)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 把请求转发到目标地址，并把上游状态、头部和响应体流原样交还给调用方。
///
/// 本身不做重试，重试和备用地址策略由下载编排器负责。
#[derive(Debug, Clone)]
pub struct ProxyForwarder {
    client: Client,
}

impl ProxyForwarder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 校验目标地址，缺失或者不是 http(s) 地址时返回 `InvalidRequest`
    pub fn validate_target(url: Option<&str>) -> Result<Url, ProxyError> {
        let raw = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ProxyError::InvalidRequest("缺少 url 参数".to_string()))?;

        let target = Url::parse(raw)
            .map_err(|e| ProxyError::InvalidRequest(format!("无法解析目标地址 {}: {}", raw, e)))?;

        match target.scheme() {
            "http" | "https" if target.host_str().is_some() => Ok(target),
            _ => Err(ProxyError::InvalidRequest(format!(
                "不支持的目标地址: {}",
                raw
            ))),
        }
    }

    pub async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let target = Self::validate_target(request.url.as_deref())?;
        let headers = outbound_headers(&request.headers, &target);

        info!("转发请求: {} {}", request.method, target);

        let mut builder = self
            .client
            .request(request.method.clone(), target.clone())
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("上游请求失败: {} - {}", target, e);
            ProxyError::from(e)
        })?;

        let status = response.status();
        debug!("上游响应: {} {}", status, target);

        if !status.is_success() {
            warn!("❌ 上游返回非成功状态码: {} - {}", status, target);
            return Err(ProxyError::upstream_status(
                status.as_u16(),
                status
                    .canonical_reason()
                    .unwrap_or("非成功状态码")
                    .to_string(),
            ));
        }

        let headers = relay_headers(response.headers());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProxyError::interrupted(e.to_string())))
            .boxed();

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

// 出站头部：去掉逐跳头部，并把 Host 改写成目标主机
pub fn outbound_headers(inbound: &HeaderMap, target: &Url) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name) || name == HOST || name == CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let authority = match (target.host_str(), target.port()) {
        (Some(host), Some(port)) => Some(format!("{}:{}", host, port)),
        (Some(host), None) => Some(host.to_string()),
        _ => None,
    };
    if let Some(value) = authority.and_then(|a| HeaderValue::from_str(&a).ok()) {
        headers.insert(HOST, value);
    }

    headers
}

// 回传头部：Content-Type / Content-Length / Content-Disposition 等保留，
// 不能出现在转发响应里的头部直接丢弃
pub fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) {
            debug!("丢弃逐跳头部: {}", name);
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}
