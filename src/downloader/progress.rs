use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use super::models::{ProgressEvent, TaskStatus};

/// 用于速度计算的平滑因子，防止速度因瞬时网络波动而剧烈变化。
const SMOOTHING_FACTOR: f64 = 0.3;

// 瞬时速度的指数平滑
#[derive(Debug)]
pub struct SpeedMeter {
    last_at: Instant,
    pending_bytes: u64,
    speed: f64,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self {
            last_at: Instant::now(),
            pending_bytes: 0,
            speed: 0.0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.pending_bytes += bytes;
    }

    /// 结算上次采样以来的字节数，返回平滑后的速度（字节/秒）
    pub fn sample(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        if elapsed <= 0.0 {
            return self.speed;
        }

        let instant = self.pending_bytes as f64 / elapsed;
        self.speed = if self.speed == 0.0 {
            instant
        } else {
            SMOOTHING_FACTOR * instant + (1.0 - SMOOTHING_FACTOR) * self.speed
        };
        self.pending_bytes = 0;
        self.last_at = now;
        self.speed
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

// --------------------------------------------------------------------

/// 命令行进度条，订阅总线事件并渲染展示字段
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new(file_name: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        bar.set_prefix(file_name.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    // 交给事件总线的处理器
    pub fn handler(&self) -> impl Fn(&ProgressEvent) + Send + Sync + 'static {
        let bar = self.bar.clone();
        move |event| render(&bar, event)
    }

    pub fn finish(&self, event: &ProgressEvent) {
        render(&self.bar, event);
        match event.status {
            TaskStatus::Completed => self.bar.finish_with_message("下载完成"),
            TaskStatus::Cancelled => self.bar.abandon_with_message("已取消"),
            _ => self.bar.abandon_with_message("下载失败"),
        }
    }
}

fn render(bar: &ProgressBar, event: &ProgressEvent) {
    let display = event.display();
    if event.total_bytes > 0 {
        bar.set_length(event.total_bytes);
    }
    bar.set_position(event.downloaded_bytes);
    bar.set_message(format!(
        "{:.1}% {}/{} {} 剩余 {}{}",
        display.percentage,
        display.downloaded,
        display.total,
        display.speed,
        display.eta,
        if event.used_fallback { " (备用地址)" } else { "" }
    ));
}
