//! Check 命令 - 预览一次扫描会被哪些订阅者接收
//!
//! 不写历史、不入队、不发送；扫描总是按新结果评估

use super::output::{format_json, format_table};
use crate::config::RelayConfig;
use crate::policy::GateDecision;
use crate::scan::{JsonScanParser, MemoryScanHistory, ObservedScan};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Check 命令参数
#[derive(Args)]
pub struct CheckArgs {
    /// 扫描结果 JSON 文件，`-` 表示 stdin
    pub scan: PathBuf,

    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,
}

/// 单个订阅者的判定
#[derive(Debug, Serialize)]
pub struct CheckRow {
    pub subscriber: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CheckRow {
    fn new(subscriber: String, decision: GateDecision) -> Self {
        match decision {
            GateDecision::Pass => Self {
                subscriber,
                accepted: true,
                rule: None,
                reason: None,
            },
            GateDecision::Reject(reason) => Self {
                subscriber,
                accepted: false,
                rule: Some(reason.rule()),
                reason: Some(reason.to_string()),
            },
        }
    }
}

fn read_scan(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read scan from stdin")?;
        return Ok(raw);
    }
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

/// 处理 check 命令
pub fn handle_check(config: &RelayConfig, args: CheckArgs) -> Result<()> {
    let raw = read_scan(&args.scan)?;
    let handler = config.handler_builder()?.dry_run(true).build()?;
    let observed = ObservedScan::observe(&raw, &JsonScanParser, &MemoryScanHistory::new())?;

    let rows: Vec<CheckRow> = handler
        .evaluate(&observed)
        .into_iter()
        .map(|(name, decision)| CheckRow::new(name, decision))
        .collect();

    if args.json {
        println!("{}", format_json(&rows));
        return Ok(());
    }

    println!("{} ({})", observed.scan.image, observed.scan.registry);
    let table: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.subscriber.clone(),
                if row.accepted { "accept" } else { "reject" }.to_string(),
                row.rule.unwrap_or("-").to_string(),
                row.reason.clone().unwrap_or_default(),
            ]
        })
        .collect();
    println!("{}", format_table(&["SUBSCRIBER", "DECISION", "RULE", "REASON"], &table));
    Ok(())
}
