//! 描述渲染 - 订阅者提供的排版能力

use crate::scan::{ScanResult, Severity};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;

/// 排版能力，由订阅者提供
pub trait LayoutProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 渲染单次扫描的描述；`previous` 存在时输出与上一次结果的差异
    fn render_scan(&self, scan: &ScanResult, previous: Option<&ScanResult>, link: &str) -> String;

    /// 二级标题（用于合并多条结果）
    fn title_h2(&self, title: &str) -> String;
}

/// 配置中可选的排版
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[default]
    Plain,
    Markdown,
}

impl LayoutKind {
    pub fn build(self) -> Arc<dyn LayoutProvider> {
        match self {
            LayoutKind::Plain => Arc::new(PlainTextLayout),
            LayoutKind::Markdown => Arc::new(MarkdownLayout),
        }
    }
}

/// 严重程度汇总行（从高到低）
struct SummaryRow {
    severity: Severity,
    count: u32,
    delta: Option<i64>,
}

fn summary_rows(scan: &ScanResult, previous: Option<&ScanResult>) -> Vec<SummaryRow> {
    Severity::ALL
        .iter()
        .rev()
        .map(|&severity| {
            let count = scan.counts.count(severity);
            SummaryRow {
                severity,
                count,
                delta: previous.map(|p| i64::from(count) - i64::from(p.counts.count(severity))),
            }
        })
        .collect()
}

fn format_delta(delta: Option<i64>) -> String {
    match delta {
        Some(d) if d > 0 => format!(" (+{})", d),
        Some(d) if d < 0 => format!(" ({})", d),
        _ => String::new(),
    }
}

/// 纯文本排版
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextLayout;

impl LayoutProvider for PlainTextLayout {
    fn name(&self) -> &str {
        "plain"
    }

    fn render_scan(&self, scan: &ScanResult, previous: Option<&ScanResult>, link: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Image name: {}", scan.image);
        let _ = writeln!(out, "Registry: {}", scan.registry);
        if scan.disallowed {
            let _ = writeln!(out, "Image is non-compliant");
        }

        let _ = writeln!(out, "Vulnerability summary:");
        for row in summary_rows(scan, previous) {
            let _ = writeln!(out, "  {}: {}{}", row.severity, row.count, format_delta(row.delta));
        }

        let findings: Vec<_> = scan
            .resources
            .iter()
            .flat_map(|r| r.vulnerabilities.iter().map(move |v| (&r.resource, v)))
            .collect();
        if !findings.is_empty() {
            let _ = writeln!(out, "Findings:");
            for (resource, finding) in findings {
                let severity = finding.severity.map(|s| s.as_str()).unwrap_or("unknown");
                let fix = finding.fix_version.as_deref().filter(|v| !v.is_empty());
                let _ = writeln!(
                    out,
                    "  - {} {}: {} [{}]{}",
                    resource.name,
                    resource.version,
                    finding.name,
                    severity,
                    fix.map(|v| format!(" fixed in {}", v)).unwrap_or_default()
                );
            }
        }

        if !link.is_empty() {
            let _ = writeln!(out, "See more: {}", link);
        }
        out
    }

    fn title_h2(&self, title: &str) -> String {
        format!("{}\n{}\n", title, "-".repeat(title.chars().count()))
    }
}

/// Markdown 排版（适用于工单系统与聊天 webhook）
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownLayout;

impl LayoutProvider for MarkdownLayout {
    fn name(&self) -> &str {
        "markdown"
    }

    fn render_scan(&self, scan: &ScanResult, previous: Option<&ScanResult>, link: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "**Image name:** `{}`  ", scan.image);
        let _ = writeln!(out, "**Registry:** `{}`  ", scan.registry);
        if scan.disallowed {
            let _ = writeln!(out, "**Image is non-compliant**  ");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "| Severity | Count |");
        let _ = writeln!(out, "|---|---|");
        for row in summary_rows(scan, previous) {
            let _ = writeln!(out, "| {} | {}{} |", row.severity, row.count, format_delta(row.delta));
        }

        let fixable: Vec<_> = scan
            .resources
            .iter()
            .flat_map(|r| r.vulnerabilities.iter().map(move |v| (&r.resource, v)))
            .filter(|(_, v)| v.has_fix())
            .collect();
        if !fixable.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "| Resource | Vulnerability | Fix version |");
            let _ = writeln!(out, "|---|---|---|");
            for (resource, finding) in fixable {
                let _ = writeln!(
                    out,
                    "| {} {} | {} | {} |",
                    resource.name,
                    resource.version,
                    finding.name,
                    finding.fix_version.as_deref().unwrap_or_default()
                );
            }
        }

        if !link.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "[See more]({})", link);
        }
        out
    }

    fn title_h2(&self, title: &str) -> String {
        format!("## {}\n", title)
    }
}
