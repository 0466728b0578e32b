//! 订阅者策略与聚合设置

use crate::scan::Severity;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// 订阅者设置
///
/// 字段名沿用配置文件中的 PascalCase 选项名
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SubscriberSettings {
    /// 重复的扫描结果也发送
    pub policy_show_all: bool,
    /// 最低漏洞等级（空字符串视为未设置）
    #[serde(deserialize_with = "deserialize_min_severity")]
    pub policy_min_vulnerability: Option<Severity>,
    /// 忽略的 registry
    pub ignore_registry: Vec<String>,
    /// 忽略的镜像
    pub ignore_image_name: Vec<String>,
    /// 只允许这些镜像（为空不过滤）
    pub policy_image_name: Vec<String>,
    /// 只允许这些 registry（为空不过滤）
    pub policy_registry: Vec<String>,
    /// 只发送不合规的镜像
    pub policy_non_compliant: bool,
    /// 只发送有可修复漏洞的结果
    pub policy_only_fix_available: bool,
    /// OPA/Rego 规则文件
    #[serde(rename = "PolicyOPA")]
    pub policy_opa: Vec<String>,
    /// 按数量聚合，0 表示关闭
    pub aggregate_issues_number: usize,
    /// 按时间聚合（秒），0 表示关闭
    pub aggregate_timeout_seconds: u64,
    /// 扫描服务地址，用于生成描述中的链接
    pub server_url: String,
}

impl SubscriberSettings {
    pub fn count_aggregation(&self) -> Option<usize> {
        (self.aggregate_issues_number > 0).then_some(self.aggregate_issues_number)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        (self.aggregate_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.aggregate_timeout_seconds))
    }

    /// 所有策略规则中用到的模式
    pub fn patterns(&self) -> impl Iterator<Item = &String> {
        self.ignore_registry
            .iter()
            .chain(&self.ignore_image_name)
            .chain(&self.policy_image_name)
            .chain(&self.policy_registry)
    }
}

fn deserialize_min_severity<'de, D>(deserializer: D) -> Result<Option<Severity>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(level) => level.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
