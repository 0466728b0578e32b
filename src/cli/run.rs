//! Run 命令 - 持续处理扫描结果
//!
//! 输入为 JSON Lines（每行一个扫描结果），来自文件或 stdin。
//! 处理完输入后保持定时刷新任务运行，直到 Ctrl+C；`--once` 时立即刷新并退出。

use super::output::format_json;
use crate::config::RelayConfig;
use crate::handler::{Delivery, ScanHandler};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Run 命令参数
#[derive(Args)]
pub struct RunArgs {
    /// 扫描结果文件（JSON Lines），缺省读取 stdin
    pub input: Option<PathBuf>,

    /// 处理完输入后刷新所有队列并退出
    #[arg(long)]
    pub once: bool,

    /// 只记录日志，不实际发送
    #[arg(long)]
    pub dry_run: bool,

    /// 以 JSON 输出统计
    #[arg(long)]
    pub json: bool,
}

/// 处理统计
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    /// 成功处理的扫描数
    pub processed: usize,
    /// 解析或历史比对失败的扫描数
    pub failed: usize,
    pub dispatched: usize,
    pub queued: usize,
    pub rejected: usize,
    pub store_failures: usize,
    /// 退出前刷新发送的条目数
    pub flushed: usize,
    /// 退出时仍留在内存中、未达到数量阈值的条目数
    pub unflushed: usize,
}

impl RunSummary {
    /// 单行文本摘要
    pub fn describe(&self) -> String {
        let mut line = format!(
            "processed {} scan(s): {} dispatched, {} queued, {} rejected, {} store failure(s), {} failed, {} flushed",
            self.processed,
            self.dispatched,
            self.queued,
            self.rejected,
            self.store_failures,
            self.failed,
            self.flushed
        );
        if self.unflushed > 0 {
            line.push_str(&format!(", {} dropped below count threshold", self.unflushed));
        }
        line
    }
}

/// 逐行处理输入
pub fn process_lines(handler: &ScanHandler, reader: impl BufRead) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read input line {}", index + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcomes = match handler.handle(line) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping scan result");
                summary.failed += 1;
                continue;
            }
        };

        summary.processed += 1;
        for outcome in outcomes {
            match outcome.delivery {
                Delivery::Dispatched { .. } => summary.dispatched += 1,
                Delivery::Queued => summary.queued += 1,
                Delivery::Rejected(_) => summary.rejected += 1,
                Delivery::StoreFailed => summary.store_failures += 1,
            }
        }
    }

    Ok(summary)
}

/// 处理 run 命令
pub async fn handle_run(config: &RelayConfig, args: RunArgs) -> Result<()> {
    let handler = Arc::new(
        config
            .handler_builder()?
            .dry_run(args.dry_run)
            .build()
            .context("failed to build scan handler")?,
    );

    let reader: Box<dyn BufRead + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    if handler.dispatcher().is_dry_run() {
        info!("Dry-run mode, notifications are logged instead of sent");
    }

    // handle 内部可能执行外部命令和文件锁，放到阻塞线程池
    let worker = handler.clone();
    let mut summary = tokio::task::spawn_blocking(move || process_lines(&worker, reader))
        .await
        .context("input worker panicked")??;

    info!(
        processed = summary.processed,
        failed = summary.failed,
        dispatched = summary.dispatched,
        queued = summary.queued,
        rejected = summary.rejected,
        "Input processed"
    );

    if !args.once && handler.scheduler().running() > 0 {
        info!("Waiting for scheduled flushes, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
    }

    // 内存队列在退出后丢失，退出前发出去；落盘的队列留给下次运行
    if args.once || config.store_dir.is_none() {
        summary.flushed = handler.flush_all();
    }
    if config.store_dir.is_none() {
        for (subscriber, pending) in handler.unflushed() {
            warn!(
                subscriber = %subscriber,
                pending,
                "Dropping scans below the count threshold, configure store_dir to keep them"
            );
            summary.unflushed += pending;
        }
    }
    handler.shutdown().await;

    if args.json {
        println!("{}", format_json(&summary));
    } else {
        println!("{}", summary.describe());
    }
    Ok(())
}
