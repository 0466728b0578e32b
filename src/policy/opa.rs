//! OPA/Rego 外部策略评估
//!
//! 通过 `opa eval` 命令评估，扫描原始输入从 stdin 传入

use crate::error::{RelayError, Result};
use crate::infra::{resolve_program, run_with_stdin};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 外部策略评估器
pub trait PolicyEvaluator: Send + Sync {
    /// 用规则文件评估原始输入；返回是否放行
    fn evaluate(&self, rule_sources: &[String], input: &str) -> Result<bool>;
}

fn default_command() -> String {
    "opa".to_string()
}

fn default_query() -> String {
    "data.scanrelay.allow".to_string()
}

/// OPA 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpaConfig {
    /// opa 命令名或路径
    #[serde(default = "default_command")]
    pub command: String,
    /// 求值的查询（结果需为布尔值）
    #[serde(default = "default_query")]
    pub query: String,
}

impl Default for OpaConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            query: default_query(),
        }
    }
}

/// 基于 `opa eval` 的评估器
#[derive(Debug, Clone)]
pub struct OpaCommandEvaluator {
    program: String,
    query: String,
}

impl OpaCommandEvaluator {
    pub fn new(config: &OpaConfig) -> Self {
        Self {
            program: resolve_program(&config.command),
            query: config.query.clone(),
        }
    }

    fn args(&self, rule_sources: &[String]) -> Vec<String> {
        let mut args: Vec<String> = ["eval", "--format", "raw", "--stdin-input"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for source in rule_sources {
            args.push("--data".to_string());
            args.push(source.clone());
        }
        args.push(self.query.clone());
        args
    }
}

impl PolicyEvaluator for OpaCommandEvaluator {
    fn evaluate(&self, rule_sources: &[String], input: &str) -> Result<bool> {
        let output = run_with_stdin(&self.program, &self.args(rule_sources), input.as_bytes())
            .map_err(|e| RelayError::Policy(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::Policy(stderr.trim().to_string()));
        }

        let verdict = parse_verdict(&String::from_utf8_lossy(&output.stdout))?;
        debug!(query = %self.query, verdict, "OPA policy evaluated");
        Ok(verdict)
    }
}

/// `--format raw` 输出：`true` / `false`，未定义时为空
fn parse_verdict(stdout: &str) -> Result<bool> {
    match stdout.trim() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        other => Err(RelayError::Policy(format!(
            "query did not evaluate to a boolean: {}",
            other
        ))),
    }
}
