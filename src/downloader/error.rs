use thiserror::Error;

use crate::proxy::error::ProxyError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("任务未找到: {0}")]
    TaskNotFound(String),

    #[error("任务已取消")]
    Cancelled,
}

impl DownloadError {
    // 是否可以切换备用地址重试：无效请求和本地 IO 错误换地址也无济于事
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Proxy(ProxyError::InvalidRequest(_)) => false,
            DownloadError::Proxy(_) => true,
            DownloadError::Io(_) | DownloadError::TaskNotFound(_) | DownloadError::Cancelled => false,
        }
    }
}
