//! 配置文件加载 - 订阅者、存储目录、模式语法与 OPA
//!
//! 查找顺序：`--config` 参数 > `SCAN_RELAY_CONFIG` 环境变量 > `<config_dir>/scan-relay/config.json`

use crate::aggregation::FileAggregationStore;
use crate::error::{RelayError, Result};
use crate::handler::ScanHandlerBuilder;
use crate::notification::LayoutKind;
use crate::policy::{OpaCommandEvaluator, OpaConfig, PatternSyntax};
use crate::scan::FileScanHistory;
use crate::subscriber::{
    CommandSubscriber, CommandSubscriberConfig, LocalFileSubscriber, Subscriber,
    SubscriberSettings, WebhookConfig, WebhookSubscriber,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "SCAN_RELAY_CONFIG";

const AGGREGATION_FILE: &str = "aggregation.json";
const HISTORY_FILE: &str = "history.json";

/// 订阅者的发送后端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Webhook(WebhookConfig),
    LocalFile { path: PathBuf },
    Command(CommandSubscriberConfig),
}

/// 单个订阅者配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub name: String,
    #[serde(flatten)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub layout: LayoutKind,
    /// 缺省时使用默认设置
    #[serde(default)]
    pub settings: SubscriberSettings,
}

/// 顶层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 订阅者未设置 `ServerUrl` 时使用
    pub server_url: String,
    pub pattern_syntax: PatternSyntax,
    /// 设置后历史与聚合队列落盘，否则只保存在内存
    pub store_dir: Option<PathBuf>,
    pub opa: OpaConfig,
    pub subscribers: Vec<SubscriberConfig>,
}

impl RelayConfig {
    /// 默认配置路径
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scan-relay")
            .join("config.json")
    }

    /// 按优先级确定配置路径
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::default_path(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            subscribers = config.subscribers.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(content).map_err(|e| RelayError::Config(e.to_string()))?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        for subscriber in &mut self.subscribers {
            if subscriber.settings.server_url.is_empty() {
                subscriber.settings.server_url = self.server_url.clone();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let engine = self.pattern_syntax.build();
        let mut names = HashSet::new();

        for subscriber in &self.subscribers {
            let name = subscriber.name.trim();
            if name.is_empty() {
                return Err(RelayError::Config("subscriber name must not be empty".to_string()));
            }
            if !names.insert(name) {
                return Err(RelayError::Config(format!("duplicate subscriber name {:?}", name)));
            }
            for pattern in subscriber.settings.patterns() {
                engine.validate(pattern).map_err(|e| {
                    RelayError::Config(format!("subscriber {:?}: {}", name, e))
                })?;
            }
        }
        Ok(())
    }

    pub fn build_subscribers(&self) -> Result<Vec<Arc<dyn Subscriber>>> {
        self.subscribers
            .iter()
            .map(|config| -> Result<Arc<dyn Subscriber>> {
                let layout = config.layout.build();
                let settings = config.settings.clone();
                let subscriber: Arc<dyn Subscriber> = match &config.backend {
                    BackendConfig::Webhook(webhook) => Arc::new(
                        WebhookSubscriber::new(&config.name, webhook.clone(), settings, layout)
                            .map_err(|e| invalid_backend(&config.name, e))?,
                    ),
                    BackendConfig::LocalFile { path } => Arc::new(LocalFileSubscriber::new(
                        &config.name,
                        path.clone(),
                        settings,
                        layout,
                    )),
                    BackendConfig::Command(command) => Arc::new(
                        CommandSubscriber::new(&config.name, command.clone(), settings, layout)
                            .map_err(|e| invalid_backend(&config.name, e))?,
                    ),
                };
                debug!(subscriber = %config.name, layout = ?config.layout, "Subscriber configured");
                Ok(subscriber)
            })
            .collect()
    }

    /// 根据配置组装处理器构建器（运行时与 dry-run 由调用方设置）
    pub fn handler_builder(&self) -> Result<ScanHandlerBuilder> {
        let mut builder = ScanHandlerBuilder::new()
            .subscribers(self.build_subscribers()?)
            .patterns(self.pattern_syntax.build())
            .evaluator(Arc::new(OpaCommandEvaluator::new(&self.opa)));

        if let Some(dir) = &self.store_dir {
            fs::create_dir_all(dir)?;
            builder = builder
                .store(Arc::new(FileAggregationStore::new(dir.join(AGGREGATION_FILE))))
                .history(Arc::new(FileScanHistory::new(dir.join(HISTORY_FILE))));
            debug!(dir = %dir.display(), "Using file-backed stores");
        }
        Ok(builder)
    }
}

fn invalid_backend(name: &str, e: anyhow::Error) -> RelayError {
    RelayError::Config(format!("subscriber {:?}: {}", name, e))
}
