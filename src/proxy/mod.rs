//! 代理转发：把请求转发到第三方目标，流式回传响应

pub mod error;
pub mod forwarder;

#[cfg(feature = "http")]
pub mod server;

pub use error::ProxyError;
pub use forwarder::{BodyStream, ProxyForwarder, ProxyRequest, ProxyResponse};
