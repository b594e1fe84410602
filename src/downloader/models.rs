use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::metrics::MetricsFormatter;

// 任务 ID：创建时分配，不会复用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// --------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    // 状态只能向前推进，终态之后不再变化
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => next != TaskStatus::Pending,
            TaskStatus::Downloading => next.is_terminal() || next == TaskStatus::Downloading,
            _ => false,
        }
    }
}

// --------------------------------------------------------------------

/// 单个下载任务，计数器只由自己的传输协程读写
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: TaskId,
    pub app_id: String,
    pub primary_url: String,
    pub fallback_url: Option<String>,
    pub file_name: String,
    pub output_path: PathBuf,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub status: TaskStatus,
    pub used_fallback: bool,
    pub attempt: u8,
    pub speed: f64,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadTask {
    pub fn new(
        app_id: String,
        primary_url: String,
        fallback_url: Option<String>,
        file_name: String,
        output_path: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            app_id,
            primary_url,
            fallback_url,
            file_name,
            output_path,
            downloaded_bytes: 0,
            total_bytes: 0,
            status: TaskStatus::Pending,
            used_fallback: false,
            attempt: 1,
            speed: 0.0,
            message: None,
            started_at: now,
            updated_at: now,
        }
    }

    // 当前尝试使用的地址
    pub fn current_url(&self) -> &str {
        match (&self.fallback_url, self.used_fallback) {
            (Some(url), true) => url,
            _ => &self.primary_url,
        }
    }

    // 累加字节数，已知总大小时保证 downloaded <= total
    pub fn add_bytes(&mut self, n: u64) {
        self.downloaded_bytes = self.downloaded_bytes.saturating_add(n);
        if self.total_bytes > 0 && self.downloaded_bytes > self.total_bytes {
            self.total_bytes = self.downloaded_bytes;
        }
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    // 传输期间写入的临时文件，每个任务独占，完成后才改名为 output_path
    pub fn part_path(&self) -> PathBuf {
        self.output_path
            .with_file_name(format!("{}.{}.part", self.file_name, self.id))
    }

    // 切换到备用地址，计数器从头开始
    pub fn engage_fallback(&mut self) -> bool {
        if self.used_fallback || self.fallback_url.is_none() {
            return false;
        }
        self.used_fallback = true;
        self.attempt = 2;
        self.downloaded_bytes = 0;
        self.total_bytes = 0;
        self.speed = 0.0;
        self.updated_at = Utc::now();
        true
    }

    pub fn snapshot(&self) -> ProgressEvent {
        ProgressEvent {
            task_id: self.id,
            app_id: self.app_id.clone(),
            file_name: self.file_name.clone(),
            status: self.status,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            speed: self.speed,
            used_fallback: self.used_fallback,
            attempt: self.attempt,
            message: self.message.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

// --------------------------------------------------------------------

/// 任务在某一时刻的不可变快照。
///
/// `downloaded_bytes` 在同一次尝试内单调不减。切换到备用地址时计数器归零，
/// 此后的事件 `attempt` 为 2、`used_fallback` 为 true，消费方应按
/// `(task_id, attempt)` 判断单调性。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub app_id: String,
    pub file_name: String,
    pub status: TaskStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed: f64, // bytes per second
    pub used_fallback: bool,
    pub attempt: u8,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn percentage(&self) -> f64 {
        MetricsFormatter::percentage(self.downloaded_bytes, self.total_bytes)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    // 给界面用的展示字段
    pub fn display(&self) -> ProgressDisplay {
        ProgressDisplay {
            file_name: self.file_name.clone(),
            percentage: self.percentage(),
            downloaded: MetricsFormatter::format_size(self.downloaded_bytes as f64),
            total: MetricsFormatter::format_size(self.total_bytes as f64),
            speed: MetricsFormatter::format_speed(self.speed),
            eta: MetricsFormatter::eta(self.total_bytes, self.downloaded_bytes, self.speed),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDisplay {
    pub file_name: String,
    pub percentage: f64,
    pub downloaded: String,
    pub total: String,
    pub speed: String,
    pub eta: String,
    pub status: TaskStatus,
}
