use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::{ProgressEventBus, Subscription};
use super::error::DownloadError;
use super::models::{DownloadTask, ProgressEvent, TaskId, TaskStatus};
use super::progress::SpeedMeter;
use super::transport::Transport;
use crate::common::models::CatalogEntry;
use crate::parser::{UrlResolver, derive_file_name};
use crate::proxy::error::ProxyError;

/// 写缓冲大小，减少小块写入
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub output_dir: PathBuf,
    pub max_concurrent: usize,
    /// 连续多久没有收到数据视为上游错误，`None` 表示不限制
    pub idle_timeout: Option<Duration>,
    /// 两次进度事件之间的最小间隔，0 表示每个数据块都发布。
    ///
    /// 大于 0 时，被节流的字节会在等待下一个数据块之前补发，不会被扣住。
    pub progress_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./downloads"),
            max_concurrent: 4,
            idle_timeout: Some(Duration::from_secs(30)),
            progress_interval: Duration::ZERO,
        }
    }
}

// 注册表里的任务句柄：取消令牌 + 最新快照
struct TaskEntry {
    cancel: CancellationToken,
    state: watch::Sender<ProgressEvent>,
}

impl TaskEntry {
    fn snapshot(&self) -> ProgressEvent {
        self.state.borrow().clone()
    }

    // 终态之后的快照一律拒绝，保证状态单向推进
    fn offer(&self, snapshot: &ProgressEvent) -> bool {
        self.state.send_if_modified(|current| {
            if current.status.is_terminal() {
                return false;
            }
            *current = snapshot.clone();
            true
        })
    }
}

/// 下载编排器：管理任意数量的并发任务，负责选址、传输、进度发布和备用地址切换。
#[derive(Clone)]
pub struct DownloadOrchestrator {
    tasks: Arc<DashMap<TaskId, Arc<TaskEntry>>>, // task_id -> Task
    transport: Arc<dyn Transport>,
    bus: ProgressEventBus,
    semaphore: Arc<Semaphore>, // 控制并发数
    options: Arc<OrchestratorOptions>,
}

impl DownloadOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        bus: ProgressEventBus,
        options: OrchestratorOptions,
    ) -> Self {
        let permits = options.max_concurrent.max(1);
        Self {
            tasks: Arc::new(DashMap::new()),
            transport,
            bus,
            semaphore: Arc::new(Semaphore::new(permits)),
            options: Arc::new(options),
        }
    }

    pub fn events(&self) -> &ProgressEventBus {
        &self.bus
    }

    /// 创建下载任务并立即返回任务 ID，传输在后台进行。
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn create_task(&self, entry: &CatalogEntry) -> TaskId {
        let task = self.prepare(entry);
        self.spawn(task)
    }

    /// 先订阅再启动传输，保证处理器能收到第一个事件
    pub fn create_task_with_handler<F>(&self, entry: &CatalogEntry, handler: F) -> (TaskId, Subscription)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let task = self.prepare(entry);
        let subscription = self.bus.subscribe(task.id, handler);
        (self.spawn(task), subscription)
    }

    /// 取消任务：中止传输，之后不再向订阅者发布任何事件。
    ///
    /// 对已经结束的任务调用是空操作。
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<(), DownloadError> {
        let entry = self.entry(task_id)?;

        let cancelled = entry.state.send_if_modified(|current| {
            if current.status.is_terminal() {
                return false;
            }
            current.status = TaskStatus::Cancelled;
            current.updated_at = chrono::Utc::now();
            true
        });

        if cancelled {
            entry.cancel.cancel();
            self.bus.close(*task_id);
            info!("⏹️ 下载任务已取消: {}", task_id);
        } else {
            debug!("任务已结束，忽略取消: {}", task_id);
        }
        Ok(())
    }

    // 获取任务最新快照
    pub fn snapshot(&self, task_id: &TaskId) -> Option<ProgressEvent> {
        self.tasks.get(task_id).map(|entry| entry.snapshot())
    }

    // 获取任务状态
    pub fn get_task_status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.snapshot(task_id).map(|s| s.status)
    }

    /// 等待任务进入终态，返回终态快照
    pub async fn wait(&self, task_id: &TaskId) -> Result<ProgressEvent, DownloadError> {
        let entry = self.entry(task_id)?;
        let mut rx = entry.state.subscribe();
        let snapshot = rx
            .wait_for(|s| s.status.is_terminal())
            .await
            .map_err(|_| DownloadError::TaskNotFound(task_id.to_string()))?
            .clone();
        Ok(snapshot)
    }

    pub fn list(&self) -> Vec<ProgressEvent> {
        let mut all: Vec<ProgressEvent> = self.tasks.iter().map(|e| e.snapshot()).collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|e| !e.snapshot().status.is_terminal())
            .count()
    }

    /// 丢弃所有已结束的任务，返回丢弃数量
    pub fn clear_finished(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| !entry.snapshot().status.is_terminal());
        before - self.tasks.len()
    }

    fn entry(&self, task_id: &TaskId) -> Result<Arc<TaskEntry>, DownloadError> {
        self.tasks
            .get(task_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| DownloadError::TaskNotFound(task_id.to_string()))
    }

    fn prepare(&self, entry: &CatalogEntry) -> DownloadTask {
        let resolved = UrlResolver::resolve(entry);
        let file_name = derive_file_name(entry, &resolved.primary_url);
        let output_path = self.options.output_dir.join(&file_name);

        DownloadTask::new(
            entry.id.clone(),
            resolved.primary_url,
            resolved.fallback_url,
            file_name,
            output_path,
        )
    }

    fn spawn(&self, task: DownloadTask) -> TaskId {
        let task_id = task.id;
        let (state, _) = watch::channel(task.snapshot());
        let entry = Arc::new(TaskEntry {
            cancel: CancellationToken::new(),
            state,
        });
        self.tasks.insert(task_id, Arc::clone(&entry));

        debug!(
            "添加下载任务: {}, 应用: {}, 文件: {}",
            task_id, task.app_id, task.file_name
        );

        let worker = TaskWorker {
            task,
            entry,
            transport: Arc::clone(&self.transport),
            bus: self.bus.clone(),
            semaphore: Arc::clone(&self.semaphore),
            options: Arc::clone(&self.options),
            meter: SpeedMeter::new(),
        };
        tokio::spawn(worker.run());

        task_id
    }
}

// 单个任务的传输协程，独占任务计数器
struct TaskWorker {
    task: DownloadTask,
    entry: Arc<TaskEntry>,
    transport: Arc<dyn Transport>,
    bus: ProgressEventBus,
    semaphore: Arc<Semaphore>,
    options: Arc<OrchestratorOptions>,
    meter: SpeedMeter,
}

impl TaskWorker {
    async fn run(mut self) {
        let cancel = self.entry.cancel.clone();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cleanup_cancelled().await;
                return;
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                self.fail("并发控制已关闭".to_string()).await;
                return;
            }
        };

        info!(
            "开始下载任务: {}, 地址: {} ({})",
            self.task.id,
            self.task.primary_url,
            self.transport.name()
        );

        let primary_error = match self.attempt().await {
            Ok(()) => return self.complete().await,
            Err(DownloadError::Cancelled) => return self.cleanup_cancelled().await,
            Err(e) => e,
        };

        if !primary_error.is_retryable() {
            return self.fail(format!("下载失败: {}", primary_error)).await;
        }

        if !self.task.engage_fallback() {
            return self
                .fail(format!(
                    "主下载地址失败，且没有可用的备用地址: {}",
                    primary_error
                ))
                .await;
        }

        warn!(
            "主下载地址失败，切换备用地址: {} -> {} ({})",
            self.task.id,
            self.task.current_url(),
            primary_error
        );
        self.meter.reset();
        self.publish();

        match self.attempt().await {
            Ok(()) => self.complete().await,
            Err(DownloadError::Cancelled) => self.cleanup_cancelled().await,
            Err(fallback_error) => {
                self.fail(format!(
                    "主下载地址与备用地址均下载失败。主地址: {}; 备用地址: {}",
                    primary_error, fallback_error
                ))
                .await
            }
        }
    }

    // 对当前地址发起一次传输
    async fn attempt(&mut self) -> Result<(), DownloadError> {
        let url = self.task.current_url().to_string();
        let cancel = self.entry.cancel.clone();
        let idle = self.options.idle_timeout;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = with_idle_timeout(idle, self.transport.open(&url)) => response??,
        };

        self.task.total_bytes = response.content_length().unwrap_or(0);
        self.task.set_status(TaskStatus::Downloading);
        self.publish();
        debug!(
            "连接成功: {}, 大小: {} 字节, 类型: {:?}",
            url,
            self.task.total_bytes,
            response.content_type()
        );

        tokio::fs::create_dir_all(&self.options.output_dir).await?;
        let file = File::create(self.task.part_path()).await?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        let mut body = response.body;
        let mut last_publish = Instant::now();
        let mut unpublished = false;

        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            // 数据块已经就绪就直接处理，否则先把节流掉的进度发出去再等待
            let ready = body.next().now_or_never();
            let next = match ready {
                Some(next) => next,
                None => {
                    if unpublished {
                        self.task.speed = self.meter.sample(Instant::now());
                        self.publish();
                        last_publish = Instant::now();
                        unpublished = false;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        next = with_idle_timeout(idle, body.next()) => next?,
                    }
                }
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(
                        "传输中断: {}, 已下载 {} 字节: {}",
                        self.task.id, self.task.downloaded_bytes, e
                    );
                    return Err(e.into());
                }
                None => break,
            };

            writer.write_all(&chunk).await?;
            self.task.add_bytes(chunk.len() as u64);
            self.meter.record(chunk.len() as u64);

            let now = Instant::now();
            if now.saturating_duration_since(last_publish) >= self.options.progress_interval {
                self.task.speed = self.meter.sample(now);
                self.publish();
                last_publish = now;
                unpublished = false;
            } else {
                unpublished = true;
            }
        }

        writer.flush().await?;

        if self.task.total_bytes > 0 && self.task.downloaded_bytes < self.task.total_bytes {
            return Err(ProxyError::interrupted(format!(
                "连接提前结束: 已接收 {} / {} 字节",
                self.task.downloaded_bytes, self.task.total_bytes
            ))
            .into());
        }

        // 总大小未知时以实际接收为准
        if self.task.total_bytes == 0 {
            self.task.total_bytes = self.task.downloaded_bytes;
        }
        Ok(())
    }

    fn publish(&self) -> bool {
        let snapshot = self.task.snapshot();
        let accepted = self.entry.offer(&snapshot);
        if accepted {
            self.bus.publish(&snapshot);
        }
        accepted
    }

    async fn complete(mut self) {
        if self.entry.cancel.is_cancelled() {
            return self.cleanup_cancelled().await;
        }

        let part_path = self.task.part_path();
        if let Err(e) = tokio::fs::rename(&part_path, &self.task.output_path).await {
            let message = format!(
                "保存文件失败: {} -> {}: {}",
                part_path.display(),
                self.task.output_path.display(),
                e
            );
            return self.fail(message).await;
        }

        self.task.speed = self.meter.sample(Instant::now());
        self.task.set_status(TaskStatus::Completed);
        if self.publish() {
            self.bus.close(self.task.id);
            info!(
                "✅ 下载任务完成: {}, {} 字节{}",
                self.task.id,
                self.task.downloaded_bytes,
                if self.task.used_fallback { " (备用地址)" } else { "" }
            );
        } else {
            // 改名之后才被取消，文件已经完整，保留
            debug!("任务在完成时被取消，保留文件: {}", self.task.output_path.display());
        }
    }

    async fn fail(mut self, message: String) {
        self.task.message = Some(message.clone());
        self.task.set_status(TaskStatus::Failed);
        remove_partial(&self.task.part_path()).await;

        if self.publish() {
            self.bus.close(self.task.id);
            error!("❌ 下载任务失败: {}, 错误: {}", self.task.id, message);
        }
    }

    async fn cleanup_cancelled(&self) {
        remove_partial(&self.task.part_path()).await;
        info!(
            "已清理被取消的任务: {}, 已下载 {} 字节",
            self.task.id, self.task.downloaded_bytes
        );
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("删除未完成文件失败: {} - {}", path.display(), e);
        }
    }
}

async fn with_idle_timeout<F: Future>(idle: Option<Duration>, fut: F) -> Result<F::Output, ProxyError> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            ProxyError::upstream(format!(
                "空闲超时: {} 秒内没有收到数据",
                limit.as_secs_f64()
            ))
        }),
        None => Ok(fut.await),
    }
}
