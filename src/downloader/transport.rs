use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::proxy::error::ProxyError;
use crate::proxy::forwarder::{ProxyForwarder, ProxyRequest, ProxyResponse, relay_headers};

/// 编排器发起传输的接缝，每次 `open` 计为一次出站连接
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<ProxyResponse, ProxyError>;

    fn name(&self) -> &'static str;
}

// 直连：在进程内通过转发器访问目标
#[async_trait]
impl Transport for ProxyForwarder {
    async fn open(&self, url: &str) -> Result<ProxyResponse, ProxyError> {
        self.forward(ProxyRequest::get(url)).await
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

/// 经过同源代理端点下载：`<endpoint>?url=<目标地址>`
#[derive(Debug, Clone)]
pub struct ProxyEndpointTransport {
    client: Client,
    endpoint: Url,
}

impl ProxyEndpointTransport {
    pub fn new(client: Client, endpoint: &str) -> Result<Self, ProxyError> {
        let endpoint = Url::parse(endpoint.trim()).map_err(|e| {
            ProxyError::InvalidRequest(format!("无效的代理端点 {}: {}", endpoint, e))
        })?;
        Ok(Self { client, endpoint })
    }

    pub fn request_url(&self, target: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("url", target);
        url
    }
}

#[async_trait]
impl Transport for ProxyEndpointTransport {
    async fn open(&self, url: &str) -> Result<ProxyResponse, ProxyError> {
        // 先在本地校验，避免无效地址产生网络请求
        ProxyForwarder::validate_target(Some(url))?;

        let request_url = self.request_url(url);
        debug!("经代理端点下载: {}", request_url);

        let response = self.client.get(request_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("代理端点返回非成功状态码: {} - {}", status, url);
            return Err(ProxyError::upstream_status(
                status.as_u16(),
                format!("代理端点返回 {}", status),
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

    fn name(&self) -> &'static str {
        "proxy-endpoint"
    }
}
