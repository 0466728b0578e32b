//! 通知分发器 - 把最终内容交给订阅者发送，不阻塞调用方

use super::content::NotificationContent;
use crate::error::{RelayError, Result};
use crate::subscriber::Subscriber;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 通知分发器
///
/// 发送在运行时的阻塞线程池中执行；调用方拿不到结果，失败只记录日志
pub struct Dispatcher {
    runtime: Handle,
    tracker: TaskTracker,
    /// 是否为 dry-run 模式
    dry_run: bool,
}

impl Dispatcher {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tracker: TaskTracker::new(),
            dry_run: false,
        }
    }

    /// 使用当前 Tokio 运行时
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| RelayError::Runtime(e.to_string()))?;
        Ok(Self::new(runtime))
    }

    /// 设置 dry-run 模式
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// 异步发送（spawn 后立即返回）
    pub fn dispatch(&self, subscriber: Arc<dyn Subscriber>, content: NotificationContent) {
        if self.dry_run {
            info!(subscriber = subscriber.name(), title = %content.title, "[DRY-RUN] Would send notification");
            return;
        }

        self.tracker.spawn_blocking_on(
            move || match subscriber.send(&content) {
                Ok(()) => debug!(subscriber = subscriber.name(), title = %content.title, "Notification sent"),
                Err(e) => warn!(subscriber = subscriber.name(), error = %e, "Subscriber send failed"),
            },
            &self.runtime,
        );
    }

    /// 尚未完成的发送数量
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 等待当前所有发送完成（不阻止后续分发）
    pub async fn idle(&self) {
        let was_closed = self.tracker.is_closed();
        self.tracker.close();
        self.tracker.wait().await;
        if !was_closed {
            self.tracker.reopen();
        }
    }

    /// 停止接收并等待所有发送完成
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
