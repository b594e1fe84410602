use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::common::client::{DEFAULT_USER_AGENT, build_client};
use crate::downloader::{OrchestratorOptions, ProxyEndpointTransport, Transport};
use crate::proxy::ProxyForwarder;

// 运行配置，可从 JSON 文件加载，再由命令行参数覆盖
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub output_dir: PathBuf,
    pub max_concurrent: usize,
    pub idle_timeout_secs: u64,    // 0 表示不限制
    pub connect_timeout_secs: u64,
    pub progress_interval_ms: u64, // 0 表示每个数据块都发布
    pub proxy_endpoint: Option<String>,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            output_dir: PathBuf::from("./downloads"),
            max_concurrent: 4,
            idle_timeout_secs: 30,
            connect_timeout_secs: 15,
            progress_interval_ms: 0,
            proxy_endpoint: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("未指定配置文件，使用默认配置");
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        info!("已加载配置文件: {}", path.display());
        Ok(config)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            output_dir: self.output_dir.clone(),
            max_concurrent: self.max_concurrent,
            idle_timeout: self.idle_timeout(),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
        }
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        build_client(
            &self.user_agent,
            Duration::from_secs(self.connect_timeout_secs.max(1)),
        )
        .context("创建 HTTP 客户端失败")
    }

    pub fn forwarder(&self) -> Result<ProxyForwarder> {
        Ok(ProxyForwarder::new(self.http_client()?))
    }

    // 配置了代理端点时经代理下载，否则在进程内直连
    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        match self.proxy_endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(endpoint) => {
                let transport = ProxyEndpointTransport::new(self.http_client()?, endpoint)?;
                info!("下载经由代理端点: {}", endpoint);
                Ok(Arc::new(transport))
            }
            None => Ok(Arc::new(self.forwarder()?)),
        }
    }
}
