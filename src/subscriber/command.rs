//! 外部命令订阅者 - 把内容 JSON 写入命令的 stdin
//!
//! 适合接入已有的通知脚本或 CLI（如工单系统客户端）

use super::{Subscriber, SubscriberSettings};
use crate::infra::{resolve_program, run_with_stdin};
use crate::notification::{LayoutProvider, NotificationContent};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// 外部命令配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSubscriberConfig {
    /// 命令名或路径
    pub command: String,
    /// 额外参数
    #[serde(default)]
    pub args: Vec<String>,
}

/// 外部命令订阅者
pub struct CommandSubscriber {
    name: String,
    program: String,
    args: Vec<String>,
    settings: SubscriberSettings,
    layout: Arc<dyn LayoutProvider>,
}

impl CommandSubscriber {
    pub fn new(
        name: impl Into<String>,
        config: CommandSubscriberConfig,
        settings: SubscriberSettings,
        layout: Arc<dyn LayoutProvider>,
    ) -> Result<Self> {
        if config.command.trim().is_empty() {
            bail!("command is required");
        }

        Ok(Self {
            name: name.into(),
            program: resolve_program(&config.command),
            args: config.args,
            settings,
            layout,
        })
    }
}

impl Subscriber for CommandSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &SubscriberSettings {
        &self.settings
    }

    fn layout(&self) -> &dyn LayoutProvider {
        self.layout.as_ref()
    }

    fn send(&self, content: &NotificationContent) -> Result<()> {
        let input = serde_json::to_vec(content)?;
        let output = run_with_stdin(&self.program, &self.args, &input)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        info!(subscriber = %self.name, command = %self.program, "Notification handed to command");
        Ok(())
    }
}
