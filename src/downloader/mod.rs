//! 下载编排：选址、传输、进度发布、备用地址切换
//!
//! - 每个任务在独立的 tokio 任务中运行，互不阻塞
//! - 响应体逐块写入磁盘，不整体缓存
//! - 进度通过 [`ProgressEventBus`] 按任务 ID 分发
//! - 主地址失败时最多切换一次备用地址

pub mod bus;
pub mod core;
pub mod error;
pub mod models;
pub mod progress;
pub mod transport;

pub use bus::{EventHandler, ProgressEventBus, Subscription};
pub use core::{DownloadOrchestrator, OrchestratorOptions};
pub use error::DownloadError;
pub use models::{DownloadTask, ProgressDisplay, ProgressEvent, TaskId, TaskStatus};
pub use transport::{ProxyEndpointTransport, Transport};
