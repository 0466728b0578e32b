//! Queue 命令 - 查看各订阅者待发送的聚合条目

use super::output::{format_json, format_table};
use crate::config::RelayConfig;
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::warn;

/// Queue 命令参数
#[derive(Args)]
pub struct QueueArgs {
    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueRow {
    pub subscriber: String,
    pub pending: usize,
}

/// 处理 queue 命令
pub fn handle_queue(config: &RelayConfig, args: QueueArgs) -> Result<()> {
    if config.store_dir.is_none() {
        warn!("No store_dir configured, queues only live inside a running relay");
    }

    let handler = config.handler_builder()?.dry_run(true).build()?;
    let mut rows = Vec::new();
    for (subscriber, pending) in handler.queue_sizes() {
        rows.push(QueueRow {
            subscriber,
            pending: pending?,
        });
    }

    if args.json {
        println!("{}", format_json(&rows));
    } else {
        let table: Vec<Vec<String>> = rows
            .iter()
            .map(|row| vec![row.subscriber.clone(), row.pending.to_string()])
            .collect();
        println!("{}", format_table(&["SUBSCRIBER", "PENDING"], &table));
    }
    Ok(())
}
