use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, warn};

use catalog_downloader::cli::{self, Command, DownloadArgs, EntryArgs};
use catalog_downloader::common::logger::{PrettyLogger, init_tracing};
use catalog_downloader::common::models::CatalogEntry;
use catalog_downloader::config::AppConfig;
use catalog_downloader::downloader::progress::ConsoleProgress;
use catalog_downloader::downloader::{DownloadOrchestrator, ProgressEventBus, TaskStatus};
use catalog_downloader::parser::{UrlResolver, derive_file_name};
use catalog_downloader::{log_error, log_info, log_success, log_warning};

/// 从文件或命令行参数构造目录条目
fn load_entry(args: &EntryArgs) -> Result<CatalogEntry> {
    if let Some(path) = &args.entry {
        return read_entry(path);
    }

    let Some(url) = &args.url else {
        bail!("需要 --entry 或 --url");
    };

    let mut entry = CatalogEntry::new(
        "cli",
        args.name.clone().unwrap_or_default(),
        url.clone(),
    );
    if let Some(fallback) = &args.fallback {
        entry = entry.with_original_url(fallback.clone());
    }
    Ok(entry)
}

fn read_entry(path: &Path) -> Result<CatalogEntry> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("读取目录条目失败: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("解析目录条目失败: {}", path.display()))
}

#[cfg(feature = "http")]
async fn run_serve(config: AppConfig) -> Result<()> {
    use catalog_downloader::proxy::server::{AppState, serve};

    let orchestrator = DownloadOrchestrator::new(
        config.transport()?,
        ProgressEventBus::new(),
        config.orchestrator_options(),
    );
    let state = AppState::new(config.forwarder()?, orchestrator);
    serve(config.listen_addr, state).await
}

#[cfg(not(feature = "http"))]
async fn run_serve(_config: AppConfig) -> Result<()> {
    bail!("当前构建未启用 http 功能")
}

async fn run_download(mut config: AppConfig, args: DownloadArgs) -> Result<()> {
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(endpoint) = args.via_proxy {
        config.proxy_endpoint = Some(endpoint);
    }
    if let Some(secs) = args.idle_timeout {
        config.idle_timeout_secs = secs;
    }

    let entry = load_entry(&args.entry)?;
    let resolved = UrlResolver::resolve(&entry);
    let file_name = derive_file_name(&entry, &resolved.primary_url);

    tokio::fs::create_dir_all(&config.output_dir).await?;
    log_info!("开始下载: {}", file_name);
    debug!("下载配置: {:?}", config);

    let orchestrator = DownloadOrchestrator::new(
        config.transport()?,
        ProgressEventBus::new(),
        config.orchestrator_options(),
    );

    let progress = ConsoleProgress::new(&file_name);
    let (task_id, _subscription) = orchestrator.create_task_with_handler(&entry, progress.handler());

    let last = tokio::select! {
        result = orchestrator.wait(&task_id) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("收到中断信号，取消下载");
            orchestrator.cancel_task(&task_id)?;
            orchestrator.wait(&task_id).await?
        }
    };
    progress.finish(&last);

    match last.status {
        TaskStatus::Completed => {
            let path = config.output_dir.join(&last.file_name);
            log_success!("下载完成: {}", path.display());
            if last.used_fallback {
                log_warning!("主下载地址不可用，已使用备用地址");
            }
            Ok(())
        }
        TaskStatus::Cancelled => {
            log_warning!("下载已取消");
            Ok(())
        }
        _ => {
            let message = last.message.unwrap_or_else(|| "未知错误".to_string());
            log_error!("{}", message);
            bail!("下载失败: {}", message)
        }
    }
}

fn run_resolve(args: &EntryArgs) -> Result<()> {
    let entry = load_entry(args)?;
    let resolved = UrlResolver::resolve(&entry);

    PrettyLogger::separator();
    PrettyLogger::field("主地址", &resolved.primary_url);
    PrettyLogger::field(
        "备用地址",
        resolved.fallback_url.as_deref().unwrap_or("(无)"),
    );
    PrettyLogger::field("文件名", derive_file_name(&entry, &resolved.primary_url));
    PrettyLogger::separator();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = cli::Cli::parse();

    // 初始化日志
    init_tracing(args.verbose);

    let mut config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Serve { listen } => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            info!("启动服务: {}", config.listen_addr);
            run_serve(config).await
        }
        Command::Download(download) => run_download(config, download).await,
        Command::Resolve(entry) => run_resolve(&entry),
    }
}
