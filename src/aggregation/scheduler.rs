//! 定时刷新调度器 - 每个按时间聚合的订阅者一个后台任务
//!
//! 任务启动由并发集合的 insert 保证只发生一次；
//! 循环在取消信号到来前一直运行：睡眠一个周期，清空队列，非空则合并发送。

use super::store::AggregationStore;
use crate::notification::{Dispatcher, NotificationContent};
use crate::subscriber::Subscriber;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 清空订阅者队列并发送合并内容；返回发送的条目数
pub fn flush_queue(
    store: &dyn AggregationStore,
    dispatcher: &Dispatcher,
    subscriber: &Arc<dyn Subscriber>,
) -> usize {
    let batch = match store.drain(subscriber.name()) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(subscriber = subscriber.name(), error = %e, "Failed to drain aggregation queue");
            return 0;
        }
    };

    match NotificationContent::merge(&batch, subscriber.layout()) {
        Some(content) => {
            info!(subscriber = subscriber.name(), items = batch.len(), "Flushing aggregated scans");
            dispatcher.dispatch(subscriber.clone(), content);
            batch.len()
        }
        None => 0,
    }
}

/// 定时刷新调度器
pub struct FlushScheduler {
    /// 已启动调度的订阅者
    started: DashSet<String>,
    store: Arc<dyn AggregationStore>,
    dispatcher: Arc<Dispatcher>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl FlushScheduler {
    pub fn new(store: Arc<dyn AggregationStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            started: DashSet::new(),
            store,
            dispatcher,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// 确保订阅者的调度任务已启动；本次调用真正启动时返回 true
    pub fn ensure_started(&self, subscriber: &Arc<dyn Subscriber>, period: Duration) -> bool {
        if !self.started.insert(subscriber.name().to_string()) {
            return false;
        }

        let subscriber = subscriber.clone();
        let store = self.store.clone();
        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn_on(
            async move {
                info!(
                    subscriber = subscriber.name(),
                    period_secs = period.as_secs(),
                    "Flush scheduler activated"
                );
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(subscriber = subscriber.name(), "Flush scheduler stopped");
                            return;
                        }
                        _ = tokio::time::sleep(period) => {}
                    }
                    flush_queue(store.as_ref(), &dispatcher, &subscriber);
                }
            },
            self.dispatcher.runtime(),
        );
        true
    }

    pub fn is_started(&self, subscriber: &str) -> bool {
        self.started.contains(subscriber)
    }

    /// 已启动的调度任务数量
    pub fn running(&self) -> usize {
        self.started.len()
    }

    /// 立即刷新一个订阅者的队列
    pub fn flush_now(&self, subscriber: &Arc<dyn Subscriber>) -> usize {
        flush_queue(self.store.as_ref(), &self.dispatcher, subscriber)
    }

    /// 发出停止信号并等待所有调度任务退出
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
