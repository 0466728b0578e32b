//! Scan Relay CLI
//!
//! 过滤、聚合并转发容器漏洞扫描结果

use anyhow::Result;
use clap::{Parser, Subcommand};
use scan_relay::cli::{handle_check, handle_queue, handle_run, CheckArgs, QueueArgs, RunArgs};
use scan_relay::RelayConfig;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "scanrelay")]
#[command(about = "Scan Relay - 按订阅者策略转发漏洞扫描结果")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 $SCAN_RELAY_CONFIG 或用户配置目录）
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 处理 JSON Lines 扫描结果并发送通知
    Run(RunArgs),
    /// 查看一次扫描会被哪些订阅者接收
    Check(CheckArgs),
    /// 查看各订阅者待发送的聚合条目
    Queue(QueueArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // 日志写到 stderr，stdout 留给命令输出
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scan_relay=info,scanrelay=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    let path = RelayConfig::resolve_path(cli.config.as_deref());
    debug!(path = %path.display(), "Loading configuration");
    let config = RelayConfig::load(&path)?;

    match cli.command {
        Commands::Run(args) => handle_run(&config, args).await?,
        Commands::Check(args) => handle_check(&config, args)?,
        Commands::Queue(args) => handle_queue(&config, args)?,
    }

    Ok(())
}
