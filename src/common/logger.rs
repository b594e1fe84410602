use colored::*;

/// 初始化 tracing，`verbose` 时输出 DEBUG 级别日志
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // 重复初始化（例如测试中）直接忽略
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

/// 漂亮的控制台输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示键值信息
    pub fn field(label: impl AsRef<str>, value: impl AsRef<str>) {
        println!("  {}: {}", label.as_ref().bold(), value.as_ref());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}
