use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// 软件目录下载工具
#[derive(Parser, Debug)]
#[command(name = "catalogdl")]
#[command(version)]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "软件目录下载与代理转发工具", long_about = None)]
pub struct Cli {
    /// 配置文件 (JSON)
    #[arg(long, global = true, value_name = "FILE")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 启动代理与下载服务
    Serve {
        /// 监听地址
        #[arg(long, value_name = "ADDR")]
        listen: Option<SocketAddr>,
    },

    /// 下载一个目录条目
    Download(DownloadArgs),

    /// 只解析下载地址，不下载
    Resolve(EntryArgs),
}

#[derive(Args, Debug)]
pub struct EntryArgs {
    /// 目录条目 JSON 文件
    #[arg(long, value_name = "FILE", conflicts_with = "url")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub entry: Option<PathBuf>,

    /// 下载链接
    #[arg(long, value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub url: Option<String>,

    /// 备用下载链接
    #[arg(long, value_name = "URL", requires = "url")]
    pub fallback: Option<String>,

    /// 显示名称
    #[arg(long, value_name = "NAME", requires = "url")]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub entry: EntryArgs,

    /// 保存目录
    #[arg(long, value_name = "DIR")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// 经由代理端点下载，例如 http://127.0.0.1:3030/api/proxy
    #[arg(long, value_name = "ENDPOINT")]
    pub via_proxy: Option<String>,

    /// 空闲超时秒数，0 表示不限制
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}
