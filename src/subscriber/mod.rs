//! 订阅者 - 通知后端的统一抽象
//!
//! 每个订阅者提供三种能力：
//! 1. 设置：策略与聚合选项
//! 2. 排版：渲染扫描描述
//! 3. 发送：把最终内容投递到后端（工单系统、聊天 webhook 等）

pub mod command;
pub mod local_file;
pub mod settings;
pub mod webhook;

pub use command::{CommandSubscriber, CommandSubscriberConfig};
pub use local_file::LocalFileSubscriber;
pub use settings::SubscriberSettings;
pub use webhook::{WebhookConfig, WebhookSubscriber};

use crate::notification::{LayoutProvider, NotificationContent};
use anyhow::Result;

/// 订阅者 trait
pub trait Subscriber: Send + Sync {
    /// 订阅者名称（聚合队列与调度器的键）
    fn name(&self) -> &str;

    fn settings(&self) -> &SubscriberSettings;

    fn layout(&self) -> &dyn LayoutProvider;

    /// 同步发送，由分发器在后台任务中调用
    fn send(&self, content: &NotificationContent) -> Result<()>;
}
