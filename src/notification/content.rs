//! 通知内容 - 单次扫描内容构建与批量合并

use super::layout::LayoutProvider;
use crate::scan::ObservedScan;
use serde::{Deserialize, Serialize};

/// 合并后的标题
pub const AGGREGATED_TITLE: &str = "Vulnerability scan report";

/// 通知内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    /// 已渲染的描述
    pub description: String,
    /// 规范链接（合并内容为多行）
    pub url: String,
    /// 原始扫描输入
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// 负责团队，分号分隔
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owners: Option<String>,
}

impl NotificationContent {
    /// 为一次扫描构建内容
    ///
    /// `server_url` 与规范路径拼接后作为描述中的链接
    pub fn for_scan(observed: &ObservedScan, layout: &dyn LayoutProvider, server_url: &str) -> Self {
        let scan = &observed.scan;
        let url = scan.canonical_path();
        let link = format!("{}{}", server_url, url);

        Self {
            title: format!("{} vulnerability scan report", scan.image),
            description: layout.render_scan(scan, observed.previous.as_ref(), &link),
            url,
            src: Some(observed.raw.clone()),
            owners: scan.owners(),
        }
    }

    /// 合并多条内容为一条；输入为空时返回 None
    pub fn merge(items: &[NotificationContent], layout: &dyn LayoutProvider) -> Option<Self> {
        if items.is_empty() {
            return None;
        }

        let mut description = String::new();
        let mut urls = String::new();
        let mut owners: Vec<&str> = Vec::new();

        for item in items {
            description.push_str(&layout.title_h2(&item.title));
            description.push_str(&item.description);
            urls.push_str(&item.url);
            urls.push('\n');

            for owner in item.owners.iter().flat_map(|o| o.split(';')) {
                if !owner.is_empty() && !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
        }

        Some(Self {
            title: AGGREGATED_TITLE.to_string(),
            description,
            url: urls,
            src: None,
            owners: (!owners.is_empty()).then(|| owners.join(";")),
        })
    }
}
