//! 扫描结果处理 - 对每个订阅者执行策略闸门、聚合与分发
//!
//! 处理流程：
//! 1. 解析并与历史比对（失败则整个扫描放弃）
//! 2. 逐个订阅者评估策略闸门
//! 3. 构建内容，按数量聚合 / 按时间聚合 / 直接发送
//!
//! `handle` 是同步调用，可以并发执行；发送和定时刷新都在后台任务中进行。

use crate::aggregation::{AggregationStore, FlushScheduler, MemoryAggregationStore};
use crate::error::{RelayError, Result};
use crate::notification::{Dispatcher, NotificationContent};
use crate::policy::{
    GateDecision, GlobEngine, OpaCommandEvaluator, OpaConfig, PatternEngine, PolicyEvaluator,
    PolicyGate, RejectReason,
};
use crate::scan::{JsonScanParser, MemoryScanHistory, ObservedScan, ScanHistory, ScanParser};
use crate::subscriber::Subscriber;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// 单个订阅者的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 被策略拒绝
    Rejected(RejectReason),
    /// 已交给分发器；`items` 为合并的扫描条数
    Dispatched { items: usize },
    /// 已入队等待聚合
    Queued,
    /// 聚合存储出错，本次不发送
    StoreFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberOutcome {
    pub subscriber: String,
    pub delivery: Delivery,
}

/// 扫描结果处理器
pub struct ScanHandler {
    subscribers: Vec<Arc<dyn Subscriber>>,
    parser: Arc<dyn ScanParser>,
    history: Arc<dyn ScanHistory>,
    gate: PolicyGate,
    store: Arc<dyn AggregationStore>,
    dispatcher: Arc<Dispatcher>,
    scheduler: FlushScheduler,
}

impl ScanHandler {
    pub fn builder() -> ScanHandlerBuilder {
        ScanHandlerBuilder::new()
    }

    pub fn subscribers(&self) -> &[Arc<dyn Subscriber>] {
        &self.subscribers
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        &self.scheduler
    }

    /// 处理一次扫描结果
    ///
    /// 只有解析或历史比对失败时返回错误；订阅者级别的失败记录日志后继续
    pub fn handle(&self, raw: &str) -> Result<Vec<SubscriberOutcome>> {
        let observed = ObservedScan::observe(raw, self.parser.as_ref(), self.history.as_ref())
            .inspect_err(|e| error!(error = %e, "Can't init scan handling, scan dropped"))?;

        info!(
            registry = %observed.scan.registry,
            image = %observed.scan.image,
            is_new = observed.is_new,
            "Handling a scan result"
        );

        Ok(self
            .subscribers
            .iter()
            .map(|subscriber| SubscriberOutcome {
                subscriber: subscriber.name().to_string(),
                delivery: self.deliver(&observed, subscriber),
            })
            .collect())
    }

    /// 只评估策略，不入队、不发送
    pub fn evaluate(&self, observed: &ObservedScan) -> Vec<(String, GateDecision)> {
        self.subscribers
            .iter()
            .map(|s| (s.name().to_string(), self.gate.evaluate(observed, s.settings())))
            .collect()
    }

    fn deliver(&self, observed: &ObservedScan, subscriber: &Arc<dyn Subscriber>) -> Delivery {
        let name = subscriber.name();
        let settings = subscriber.settings();

        if let GateDecision::Reject(reason) = self.gate.evaluate(observed, settings) {
            info!(
                subscriber = name,
                scan = %observed.scan.unique_id(),
                rule = reason.rule(),
                reason = %reason,
                "Scan skipped by policy"
            );
            return Delivery::Rejected(reason);
        }

        let content =
            NotificationContent::for_scan(observed, subscriber.layout(), &settings.server_url);
        let mut outgoing = Some((content, 1));
        let mut handled = false;
        let mut store_failed = false;

        if let Some(threshold) = settings.count_aggregation() {
            handled = true;
            let item = outgoing.take().map(|(content, _)| content);
            match self.store.accept(name, item, threshold, false) {
                Ok(batch) => {
                    outgoing = NotificationContent::merge(&batch, subscriber.layout())
                        .map(|merged| (merged, batch.len()));
                    if outgoing.is_none() {
                        debug!(subscriber = name, threshold, "Scan added to the queue without sending");
                    }
                }
                Err(e) => {
                    warn!(subscriber = name, error = %e, "Aggregation store failed");
                    store_failed = true;
                }
            }
        }

        if let Some(period) = settings.flush_interval() {
            if !handled {
                if let Some((content, _)) = outgoing.take() {
                    match self.store.accept(name, Some(content), 0, true) {
                        Ok(_) => debug!(subscriber = name, "Scan queued for the next scheduled flush"),
                        Err(e) => {
                            warn!(subscriber = name, error = %e, "Aggregation store failed");
                            store_failed = true;
                        }
                    }
                }
            }
            self.scheduler.ensure_started(subscriber, period);
        }

        match outgoing {
            Some((content, items)) => {
                self.dispatcher.dispatch(subscriber.clone(), content);
                Delivery::Dispatched { items }
            }
            None if store_failed => Delivery::StoreFailed,
            None => Delivery::Queued,
        }
    }

    /// 立即刷新所有按时间聚合的订阅者队列；返回发送的条目数
    pub fn flush_all(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|s| s.settings().flush_interval().is_some())
            .map(|s| self.scheduler.flush_now(s))
            .sum()
    }

    /// 只按数量聚合的订阅者中仍有排队内容的（定时刷新不会发送它们）
    pub fn unflushed(&self) -> Vec<(String, usize)> {
        self.subscribers
            .iter()
            .filter(|s| {
                let settings = s.settings();
                settings.count_aggregation().is_some() && settings.flush_interval().is_none()
            })
            .filter_map(|s| match self.store.pending(s.name()) {
                Ok(0) => None,
                Ok(pending) => Some((s.name().to_string(), pending)),
                Err(e) => {
                    warn!(subscriber = s.name(), error = %e, "Can't read aggregation queue");
                    None
                }
            })
            .collect()
    }

    /// 每个订阅者当前排队数量
    pub fn queue_sizes(&self) -> Vec<(String, Result<usize>)> {
        self.subscribers
            .iter()
            .map(|s| (s.name().to_string(), self.store.pending(s.name())))
            .collect()
    }

    /// 停止调度任务并等待所有发送完成
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.dispatcher.shutdown().await;
    }
}

/// 处理器构建器；未指定的组件使用内存实现
#[derive(Default)]
pub struct ScanHandlerBuilder {
    subscribers: Vec<Arc<dyn Subscriber>>,
    parser: Option<Arc<dyn ScanParser>>,
    history: Option<Arc<dyn ScanHistory>>,
    store: Option<Arc<dyn AggregationStore>>,
    patterns: Option<Arc<dyn PatternEngine>>,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
    runtime: Option<Handle>,
    dry_run: bool,
}

impl ScanHandlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn subscribers(mut self, subscribers: impl IntoIterator<Item = Arc<dyn Subscriber>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn ScanParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn history(mut self, history: Arc<dyn ScanHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn store(mut self, store: Arc<dyn AggregationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn patterns(mut self, patterns: Arc<dyn PatternEngine>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// 指定后台任务使用的运行时（默认当前运行时）
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn build(self) -> Result<ScanHandler> {
        let mut names = HashSet::new();
        for subscriber in &self.subscribers {
            if subscriber.name().trim().is_empty() {
                return Err(RelayError::Config("subscriber name must not be empty".to_string()));
            }
            if !names.insert(subscriber.name()) {
                return Err(RelayError::Config(format!(
                    "duplicate subscriber name {:?}",
                    subscriber.name()
                )));
            }
        }

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| RelayError::Runtime(e.to_string()))?,
        };
        let dispatcher = Arc::new(Dispatcher::new(runtime).with_dry_run(self.dry_run));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryAggregationStore::new()));
        let gate = PolicyGate::new(
            self.patterns.unwrap_or_else(|| Arc::new(GlobEngine)),
            self.evaluator
                .unwrap_or_else(|| Arc::new(OpaCommandEvaluator::new(&OpaConfig::default()))),
        );

        Ok(ScanHandler {
            subscribers: self.subscribers,
            parser: self.parser.unwrap_or_else(|| Arc::new(JsonScanParser)),
            history: self
                .history
                .unwrap_or_else(|| Arc::new(MemoryScanHistory::new())),
            gate,
            scheduler: FlushScheduler::new(store.clone(), dispatcher.clone()),
            store,
            dispatcher,
        })
    }
}
