//! 扫描结果模型 - 镜像漏洞扫描结果及其解析

pub mod history;
pub mod severity;

pub use history::{FileScanHistory, MemoryScanHistory, Observation, ScanHistory};
pub use severity::{Severity, SeverityCounts};

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};

/// 单个漏洞发现
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// 漏洞编号（如 CVE-2024-0001）
    pub name: String,
    /// 严重程度
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// 修复版本（缺省或空字符串表示暂无修复，其余内容原样视为有修复）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_version: Option<String>,
}

impl Finding {
    pub fn has_fix(&self) -> bool {
        self.fix_version
            .as_deref()
            .is_some_and(|v| !v.is_empty())
    }
}

/// 镜像中的软件包
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// 某个软件包上的所有漏洞
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFindings {
    #[serde(default)]
    pub resource: Resource,
    #[serde(default)]
    pub vulnerabilities: Vec<Finding>,
}

/// 一次镜像扫描的结构化结果，解析后不可变
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub image: String,
    pub registry: String,
    #[serde(default)]
    pub digest: String,
    /// 各严重程度的漏洞数量
    #[serde(default, rename = "vulnerability_summary")]
    pub counts: SeverityCounts,
    #[serde(default)]
    pub resources: Vec<ResourceFindings>,
    /// 镜像是否被判定为不合规
    #[serde(default)]
    pub disallowed: bool,
    /// 负责团队
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_scope_owners: Vec<String>,
}

impl ScanResult {
    /// 唯一标识: digest-registry-image
    pub fn unique_id(&self) -> String {
        format!("{}-{}-{}", self.digest, self.registry, self.image)
    }

    /// 所有漏洞发现
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.resources.iter().flat_map(|r| r.vulnerabilities.iter())
    }

    /// 是否至少有一个漏洞可修复
    pub fn has_fixable_findings(&self) -> bool {
        self.findings().any(Finding::has_fix)
    }

    /// 负责团队，分号拼接
    pub fn owners(&self) -> Option<String> {
        if self.application_scope_owners.is_empty() {
            None
        } else {
            Some(self.application_scope_owners.join(";"))
        }
    }

    /// 规范链接路径: registry/image（image 中的 `/` 转义为 `%2F`）
    pub fn canonical_path(&self) -> String {
        format!("{}/{}", self.registry, self.image.replace('/', "%2F"))
    }
}

/// 扫描结果解析器
pub trait ScanParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<ScanResult>;
}

/// JSON 扫描结果解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonScanParser;

impl ScanParser for JsonScanParser {
    fn parse(&self, raw: &str) -> Result<ScanResult> {
        serde_json::from_str(raw).map_err(RelayError::Parse)
    }
}

/// 经过历史比对的扫描：当前结果、原始输入、上一次结果与新鲜度
#[derive(Debug, Clone)]
pub struct ObservedScan {
    pub scan: ScanResult,
    pub raw: String,
    /// 仅当本次为新结果且存在历史记录时才有值
    pub previous: Option<ScanResult>,
    pub is_new: bool,
}

impl ObservedScan {
    /// 解析并与历史比对；任一步失败则整个扫描放弃处理
    pub fn observe(raw: &str, parser: &dyn ScanParser, history: &dyn ScanHistory) -> Result<Self> {
        let scan = parser.parse(raw)?;
        let observation = history.observe(&scan)?;

        let previous = match observation.previous_raw {
            Some(prev) if observation.is_new && !prev.is_empty() => Some(parser.parse(&prev)?),
            _ => None,
        };

        Ok(Self {
            scan,
            raw: raw.to_string(),
            previous,
            is_new: observation.is_new,
        })
    }
}
