use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use tracing::warn;

pub const DEFAULT_USER_AGENT: &str = concat!("catalogdl/", env!("CARGO_PKG_VERSION"));

// 出站请求使用的客户端，只设置连接超时：大文件传输不能有整体超时
pub fn build_client(user_agent: &str, connect_timeout: Duration) -> reqwest::Result<Client> {
    ClientBuilder::new()
        .connect_timeout(connect_timeout)
        .default_headers(default_headers(user_agent))
        .build()
}

pub fn default_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));

    match HeaderValue::from_str(user_agent) {
        Ok(value) => {
            headers.insert(USER_AGENT, value);
        }
        Err(e) => {
            warn!("User-Agent 非法，使用默认值: {}", e);
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
    }

    headers
}
