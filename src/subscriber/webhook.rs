//! Webhook 订阅者 - 通过 HTTP POST 投递 JSON 内容

use super::{Subscriber, SubscriberSettings};
use crate::notification::{LayoutProvider, NotificationContent};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn default_timeout_secs() -> u64 {
    30
}

/// Webhook 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// 目标地址
    pub url: String,
    /// Bearer token（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// 超时时间 (秒)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/hooks/scan".to_string(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Webhook 请求载荷
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    /// 来源订阅者
    pub subscriber: &'a str,
    #[serde(flatten)]
    pub content: &'a NotificationContent,
}

/// Webhook 订阅者
pub struct WebhookSubscriber {
    name: String,
    config: WebhookConfig,
    settings: SubscriberSettings,
    layout: Arc<dyn LayoutProvider>,
}

impl WebhookSubscriber {
    pub fn new(
        name: impl Into<String>,
        config: WebhookConfig,
        settings: SubscriberSettings,
        layout: Arc<dyn LayoutProvider>,
    ) -> Result<Self> {
        if config.url.trim().is_empty() {
            bail!("webhook url is required");
        }

        Ok(Self {
            name: name.into(),
            config,
            settings,
            layout,
        })
    }
}

impl Subscriber for WebhookSubscriber {
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
        // blocking client 在后台线程内创建并销毁，不能放进异步上下文
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let payload = WebhookPayload {
            subscriber: &self.name,
            content,
        };

        let mut request = client.post(&self.config.url).json(&payload);
        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .with_context(|| format!("HTTP request to {} failed", self.config.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("webhook responded with {}: {}", status, body);
        }

        info!(subscriber = %self.name, title = %content.title, "Webhook notification delivered");
        Ok(())
    }
}
