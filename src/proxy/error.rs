use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("无效的代理请求: {0}")]
    InvalidRequest(String),

    #[error("上游请求失败{}: {message}", format_status(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("传输中断: {message}")]
    StreamInterrupted { message: String },
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (状态码 {})", s)).unwrap_or_default()
}

impl ProxyError {
    pub fn upstream(message: impl Into<String>) -> Self {
        ProxyError::Upstream {
            status: None,
            message: message.into(),
        }
    }

    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        ProxyError::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        ProxyError::StreamInterrupted {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "InvalidRequest",
            ProxyError::Upstream { .. } => "UpstreamError",
            ProxyError::StreamInterrupted { .. } => "StreamInterrupted",
        }
    }

    // 上游状态码，未拿到响应时为 None
    pub fn status(&self) -> Option<u16> {
        match self {
            ProxyError::Upstream { status, .. } => *status,
            _ => None,
        }
    }
}

// 连接、TLS、读取失败统一归为上游错误
impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = if e.is_timeout() {
            format!("请求超时: {}", e)
        } else if e.is_connect() {
            format!("无法连接上游: {}", e)
        } else {
            e.to_string()
        };
        ProxyError::Upstream { status, message }
    }
}

#[cfg(feature = "http")]
mod response {
    use axum::Json;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use serde_json::json;

    use super::ProxyError;

    impl IntoResponse for ProxyError {
        fn into_response(self) -> Response {
            // 上游状态码原样透传，拿不到状态码时返回 502
            let status = match &self {
                ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ProxyError::Upstream {
                    status: Some(code), ..
                } => StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY),
                ProxyError::Upstream { status: None, .. } | ProxyError::StreamInterrupted { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            };

            let body = Json(json!({
                "error": self.kind(),
                "message": self.to_string(),
            }));

            (status, body).into_response()
        }
    }
}
