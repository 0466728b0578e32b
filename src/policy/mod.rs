//! 策略闸门 - 判断某个订阅者是否应收到某次扫描结果
//!
//! 按固定顺序依次检查，第一个不满足的规则即拒绝：
//! 1. 新鲜度 2. 最低漏洞等级 3. 忽略 registry 4. 忽略镜像
//! 5. 镜像白名单 6. registry 白名单 7. 仅不合规 8. 仅可修复 9. OPA 规则

pub mod opa;
pub mod pattern;

pub use opa::{OpaCommandEvaluator, OpaConfig, PolicyEvaluator};
pub use pattern::{complies_with_policies, GlobEngine, PatternEngine, PatternSyntax, RegexEngine};

use crate::scan::{ObservedScan, Severity};
use crate::subscriber::SubscriberSettings;
use std::fmt;
use std::sync::Arc;

/// 拒绝原因（对应决定性的规则）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// 重复的扫描结果
    NotNew,
    BelowMinSeverity(Severity),
    IgnoredRegistry,
    IgnoredImage,
    ImageNotAllowed,
    RegistryNotAllowed,
    /// 镜像合规，但只要求不合规的结果
    Compliant,
    NoFixAvailable,
    /// OPA 评估出错
    PolicyError(String),
    /// OPA 规则不放行
    PolicyDenied,
}

impl RejectReason {
    /// 决定性的配置项
    pub fn rule(&self) -> &'static str {
        match self {
            RejectReason::NotNew => "PolicyShowAll",
            RejectReason::BelowMinSeverity(_) => "PolicyMinVulnerability",
            RejectReason::IgnoredRegistry => "IgnoreRegistry",
            RejectReason::IgnoredImage => "IgnoreImageName",
            RejectReason::ImageNotAllowed => "PolicyImageName",
            RejectReason::RegistryNotAllowed => "PolicyRegistry",
            RejectReason::Compliant => "PolicyNonCompliant",
            RejectReason::NoFixAvailable => "PolicyOnlyFixAvailable",
            RejectReason::PolicyError(_) | RejectReason::PolicyDenied => "PolicyOPA",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotNew => write!(f, "scan result is not new"),
            RejectReason::BelowMinSeverity(min) => {
                write!(f, "no vulnerabilities at or above {}", min)
            }
            RejectReason::IgnoredRegistry => write!(f, "registry is ignored"),
            RejectReason::IgnoredImage => write!(f, "image is ignored"),
            RejectReason::ImageNotAllowed => write!(f, "image is not allowed"),
            RejectReason::RegistryNotAllowed => write!(f, "registry is not allowed"),
            RejectReason::Compliant => write!(f, "image is compliant"),
            RejectReason::NoFixAvailable => write!(f, "no vulnerability has a fix version"),
            RejectReason::PolicyError(e) => write!(f, "OPA policy evaluation failed: {}", e),
            RejectReason::PolicyDenied => write!(f, "scan result doesn't match OPA rules"),
        }
    }
}

/// 闸门判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Reject(RejectReason),
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateDecision::Pass)
    }
}

fn ensure(condition: bool, reason: RejectReason) -> Result<(), RejectReason> {
    if condition {
        Ok(())
    } else {
        Err(reason)
    }
}

/// 策略闸门
#[derive(Clone)]
pub struct PolicyGate {
    patterns: Arc<dyn PatternEngine>,
    evaluator: Arc<dyn PolicyEvaluator>,
}

impl PolicyGate {
    pub fn new(patterns: Arc<dyn PatternEngine>, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        Self { patterns, evaluator }
    }

    /// 评估 (扫描, 订阅者设置)
    pub fn evaluate(&self, observed: &ObservedScan, settings: &SubscriberSettings) -> GateDecision {
        match self.check(observed, settings) {
            Ok(()) => GateDecision::Pass,
            Err(reason) => GateDecision::Reject(reason),
        }
    }

    fn check(&self, observed: &ObservedScan, settings: &SubscriberSettings) -> Result<(), RejectReason> {
        let scan = &observed.scan;
        let complies = |patterns: &[String], target: &str| {
            complies_with_policies(self.patterns.as_ref(), patterns, target)
        };

        ensure(observed.is_new || settings.policy_show_all, RejectReason::NotNew)?;

        if let Some(min) = settings.policy_min_vulnerability {
            ensure(scan.counts.any_at_or_above(min), RejectReason::BelowMinSeverity(min))?;
        }

        ensure(
            !complies(&settings.ignore_registry, &scan.registry),
            RejectReason::IgnoredRegistry,
        )?;
        ensure(
            !complies(&settings.ignore_image_name, &scan.image),
            RejectReason::IgnoredImage,
        )?;

        if !settings.policy_image_name.is_empty() {
            ensure(
                complies(&settings.policy_image_name, &scan.image),
                RejectReason::ImageNotAllowed,
            )?;
        }
        if !settings.policy_registry.is_empty() {
            ensure(
                complies(&settings.policy_registry, &scan.registry),
                RejectReason::RegistryNotAllowed,
            )?;
        }

        if settings.policy_non_compliant {
            ensure(scan.disallowed, RejectReason::Compliant)?;
        }
        if settings.policy_only_fix_available {
            ensure(scan.has_fixable_findings(), RejectReason::NoFixAvailable)?;
        }

        if !settings.policy_opa.is_empty() {
            let allowed = self
                .evaluator
                .evaluate(&settings.policy_opa, &observed.raw)
                .map_err(|e| RejectReason::PolicyError(e.to_string()))?;
            ensure(allowed, RejectReason::PolicyDenied)?;
        }

        Ok(())
    }
}
