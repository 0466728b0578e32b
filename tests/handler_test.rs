//! 扫描处理端到端测试：策略闸门、按数量/按时间聚合、后台发送

use scan_relay::notification::{PlainTextLayout, AGGREGATED_TITLE};
use scan_relay::{
    AggregationStore, Delivery, LayoutProvider, MemoryAggregationStore, NotificationContent,
    PolicyEvaluator, RejectReason, RelayError, ScanHandler, Severity, Subscriber,
    SubscriberSettings,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 记录所有发送内容的订阅者
struct Recorder {
    name: String,
    settings: SubscriberSettings,
    sent: Mutex<Vec<NotificationContent>>,
}

impl Recorder {
    fn new(name: &str, settings: SubscriberSettings) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            settings,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<NotificationContent> {
        self.sent.lock().unwrap().clone()
    }
}

impl Subscriber for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &SubscriberSettings {
        &self.settings
    }

    fn layout(&self) -> &dyn LayoutProvider {
        &PlainTextLayout
    }

    fn send(&self, content: &NotificationContent) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(content.clone());
        Ok(())
    }
}

/// 固定结果的 OPA 评估器
struct FixedPolicy {
    verdict: Option<bool>,
    calls: AtomicUsize,
}

impl FixedPolicy {
    fn new(verdict: Option<bool>) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            calls: AtomicUsize::new(0),
        })
    }
}

impl PolicyEvaluator for FixedPolicy {
    fn evaluate(&self, _rule_sources: &[String], _input: &str) -> scan_relay::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict
            .ok_or_else(|| RelayError::Policy("opa exited with status 1".to_string()))
    }
}

/// 总是失败的聚合存储
struct BrokenStore;

impl AggregationStore for BrokenStore {
    fn accept(
        &self,
        subscriber: &str,
        _item: Option<NotificationContent>,
        _threshold: usize,
        _ignore_length: bool,
    ) -> scan_relay::Result<Vec<NotificationContent>> {
        Err(RelayError::store(subscriber, "disk full"))
    }

    fn pending(&self, subscriber: &str) -> scan_relay::Result<usize> {
        Err(RelayError::store(subscriber, "disk full"))
    }
}

fn scan(image: &str, registry: &str, summary: &str) -> String {
    format!(
        r#"{{"image":"{image}","registry":"{registry}","digest":"sha256:{image}","vulnerability_summary":{summary}}}"#
    )
}

fn high(image: &str) -> String {
    scan(image, "docker.io", r#"{"high":2,"low":1}"#)
}

fn handler_for(recorders: &[&Arc<Recorder>]) -> ScanHandler {
    let subscribers = recorders.iter().map(|r| -> Arc<dyn Subscriber> { Arc::clone(*r) as Arc<dyn Subscriber> });
    ScanHandler::builder()
        .subscribers(subscribers)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_repeat_scan_is_suppressed() {
    let recorder = Recorder::new("jira", SubscriberSettings::default());
    let handler = handler_for(&[&recorder]);

    let first = handler.handle(&high("app")).unwrap();
    let second = handler.handle(&high("app")).unwrap();

    assert_eq!(first[0].delivery, Delivery::Dispatched { items: 1 });
    assert_eq!(second[0].delivery, Delivery::Rejected(RejectReason::NotNew));

    handler.shutdown().await;
    assert_eq!(recorder.sent().len(), 1);
}

#[tokio::test]
async fn test_show_all_sends_repeats() {
    let settings = SubscriberSettings {
        policy_show_all: true,
        ..Default::default()
    };
    let recorder = Recorder::new("jira", settings);
    let handler = handler_for(&[&recorder]);

    handler.handle(&high("app")).unwrap();
    handler.handle(&high("app")).unwrap();

    handler.shutdown().await;
    assert_eq!(recorder.sent().len(), 2);
}

#[tokio::test]
async fn test_changed_scan_reports_previous_delta() {
    let recorder = Recorder::new("jira", SubscriberSettings::default());
    let handler = handler_for(&[&recorder]);

    handler
        .handle(&scan("app", "docker.io", r#"{"high":1}"#))
        .unwrap();
    let outcomes = handler
        .handle(&scan("app", "docker.io", r#"{"high":3}"#))
        .unwrap();
    assert_eq!(outcomes[0].delivery, Delivery::Dispatched { items: 1 });

    handler.shutdown().await;
    let sent = recorder.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].description.contains("(+2)"));
}

#[tokio::test]
async fn test_min_severity_gate() {
    let settings = SubscriberSettings {
        policy_min_vulnerability: Some(Severity::High),
        ..Default::default()
    };
    let recorder = Recorder::new("jira", settings);
    let handler = handler_for(&[&recorder]);

    let low = handler
        .handle(&scan("quiet", "docker.io", r#"{"medium":4,"low":9}"#))
        .unwrap();
    let critical = handler
        .handle(&scan("loud", "docker.io", r#"{"critical":1}"#))
        .unwrap();

    assert_eq!(
        low[0].delivery,
        Delivery::Rejected(RejectReason::BelowMinSeverity(Severity::High))
    );
    assert_eq!(critical[0].delivery, Delivery::Dispatched { items: 1 });

    handler.shutdown().await;
    assert_eq!(recorder.sent().len(), 1);
    assert_eq!(recorder.sent()[0].title, "loud vulnerability scan report");
}

#[tokio::test]
async fn test_ignore_and_allow_lists() {
    let settings = SubscriberSettings {
        ignore_registry: vec!["*.internal".to_string()],
        policy_image_name: vec!["team/*".to_string()],
        ..Default::default()
    };
    let recorder = Recorder::new("jira", settings);
    let handler = handler_for(&[&recorder]);

    let ignored = handler
        .handle(&scan("team/api", "registry.internal", "{}"))
        .unwrap();
    let not_allowed = handler
        .handle(&scan("other/api", "docker.io", "{}"))
        .unwrap();
    let allowed = handler
        .handle(&scan("team/web", "docker.io", "{}"))
        .unwrap();

    assert_eq!(ignored[0].delivery, Delivery::Rejected(RejectReason::IgnoredRegistry));
    assert_eq!(not_allowed[0].delivery, Delivery::Rejected(RejectReason::ImageNotAllowed));
    assert_eq!(allowed[0].delivery, Delivery::Dispatched { items: 1 });

    handler.shutdown().await;
}

#[tokio::test]
async fn test_compliance_and_fix_gates() {
    let settings = SubscriberSettings {
        policy_non_compliant: true,
        policy_only_fix_available: true,
        ..Default::default()
    };
    let recorder = Recorder::new("jira", settings);
    let handler = handler_for(&[&recorder]);

    let compliant = handler
        .handle(r#"{"image":"a","registry":"r","digest":"1","disallowed":false}"#)
        .unwrap();
    let unfixable = handler
        .handle(
            r#"{"image":"b","registry":"r","digest":"2","disallowed":true,
                "resources":[{"resource":{"name":"zlib","version":"1.2"},
                              "vulnerabilities":[{"name":"CVE-1","severity":"high"}]}]}"#,
        )
        .unwrap();
    let fixable = handler
        .handle(
            r#"{"image":"c","registry":"r","digest":"3","disallowed":true,
                "resources":[{"resource":{"name":"zlib","version":"1.2"},
                              "vulnerabilities":[{"name":"CVE-1","severity":"high","fix_version":"1.3"}]}]}"#,
        )
        .unwrap();

    assert_eq!(compliant[0].delivery, Delivery::Rejected(RejectReason::Compliant));
    assert_eq!(unfixable[0].delivery, Delivery::Rejected(RejectReason::NoFixAvailable));
    assert_eq!(fixable[0].delivery, Delivery::Dispatched { items: 1 });

    handler.shutdown().await;
}

#[tokio::test]
async fn test_opa_rules_gate_last() {
    let settings = SubscriberSettings {
        policy_opa: vec!["/etc/scan-relay/allow.rego".to_string()],
        ignore_image_name: vec!["skip-me".to_string()],
        ..Default::default()
    };
    let deny = FixedPolicy::new(Some(false));
    let handler = ScanHandler::builder()
        .subscriber(Recorder::new("jira", settings.clone()))
        .evaluator(deny.clone())
        .build()
        .unwrap();

    let skipped = handler.handle(&high("skip-me")).unwrap();
    assert_eq!(skipped[0].delivery, Delivery::Rejected(RejectReason::IgnoredImage));
    assert_eq!(deny.calls.load(Ordering::SeqCst), 0);

    let denied = handler.handle(&high("app")).unwrap();
    assert_eq!(denied[0].delivery, Delivery::Rejected(RejectReason::PolicyDenied));
    assert_eq!(deny.calls.load(Ordering::SeqCst), 1);
    handler.shutdown().await;

    let broken = ScanHandler::builder()
        .subscriber(Recorder::new("jira", settings))
        .evaluator(FixedPolicy::new(None))
        .build()
        .unwrap();
    let errored = broken.handle(&high("app")).unwrap();
    assert!(matches!(
        errored[0].delivery,
        Delivery::Rejected(RejectReason::PolicyError(_))
    ));
    broken.shutdown().await;
}

#[tokio::test]
async fn test_count_aggregation_batches_of_three() {
    let settings = SubscriberSettings {
        aggregate_issues_number: 3,
        ..Default::default()
    };
    let recorder = Recorder::new("jira", settings);
    let store = Arc::new(MemoryAggregationStore::new());
    let handler = ScanHandler::builder()
        .subscriber(recorder.clone())
        .store(store.clone())
        .build()
        .unwrap();

    let a = handler.handle(&high("app-a")).unwrap();
    let b = handler.handle(&high("app-b")).unwrap();
    handler.dispatcher().idle().await;
    assert_eq!(a[0].delivery, Delivery::Queued);
    assert_eq!(b[0].delivery, Delivery::Queued);
    assert!(recorder.sent().is_empty());
    assert_eq!(store.pending("jira").unwrap(), 2);

    let c = handler.handle(&high("app-c")).unwrap();
    assert_eq!(c[0].delivery, Delivery::Dispatched { items: 3 });
    assert_eq!(store.pending("jira").unwrap(), 0);

    let d = handler.handle(&high("app-d")).unwrap();
    assert_eq!(d[0].delivery, Delivery::Queued);
    assert_eq!(store.pending("jira").unwrap(), 1);

    handler.shutdown().await;
    let sent = recorder.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, AGGREGATED_TITLE);
    for image in ["app-a", "app-b", "app-c"] {
        assert!(sent[0].description.contains(image));
    }
    assert!(!sent[0].description.contains("app-d"));
    assert!(sent[0].src.is_none());
}

// 暂停的时钟：sleep 在运行时空闲时自动推进，周期到点的顺序是确定的
#[tokio::test(start_paused = true)]
async fn test_time_aggregation_flushes_once_per_period() {
    let settings = SubscriberSettings {
        aggregate_timeout_seconds: 1,
        ..Default::default()
    };
    let recorder = Recorder::new("digest", settings);
    let handler = handler_for(&[&recorder]);

    let a = handler.handle(&high("app-a")).unwrap();
    let b = handler.handle(&high("app-b")).unwrap();
    assert_eq!(a[0].delivery, Delivery::Queued);
    assert_eq!(b[0].delivery, Delivery::Queued);
    assert_eq!(handler.scheduler().running(), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    handler.dispatcher().idle().await;
    let sent = recorder.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].description.contains("app-a"));
    assert!(sent[0].description.contains("app-b"));

    // 空队列的周期不发送
    tokio::time::sleep(Duration::from_millis(1200)).await;
    handler.dispatcher().idle().await;
    assert_eq!(recorder.sent().len(), 1);

    handler.shutdown().await;
}

#[tokio::test]
async fn test_flush_all_sends_pending_time_queue() {
    let settings = SubscriberSettings {
        aggregate_timeout_seconds: 3600,
        ..Default::default()
    };
    let recorder = Recorder::new("digest", settings);
    let handler = handler_for(&[&recorder]);

    handler.handle(&high("app-a")).unwrap();
    assert_eq!(handler.flush_all(), 1);
    assert_eq!(handler.flush_all(), 0);

    handler.shutdown().await;
    assert_eq!(recorder.sent().len(), 1);
}

#[tokio::test]
async fn test_count_and_time_both_enabled() {
    let settings = SubscriberSettings {
        aggregate_issues_number: 2,
        aggregate_timeout_seconds: 3600,
        ..Default::default()
    };
    let recorder = Recorder::new("jira", settings);
    let handler = handler_for(&[&recorder]);

    let a = handler.handle(&high("app-a")).unwrap();
    let b = handler.handle(&high("app-b")).unwrap();

    // 按数量聚合已处理，不再重复入队；调度任务仍会启动
    assert_eq!(a[0].delivery, Delivery::Queued);
    assert_eq!(b[0].delivery, Delivery::Dispatched { items: 2 });
    assert!(handler.scheduler().is_started("jira"));
    assert_eq!(handler.flush_all(), 0);

    handler.shutdown().await;
    assert_eq!(recorder.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scans_start_one_scheduler() {
    let settings = SubscriberSettings {
        aggregate_timeout_seconds: 3600,
        ..Default::default()
    };
    let store = Arc::new(MemoryAggregationStore::new());
    let handler = Arc::new(
        ScanHandler::builder()
            .subscriber(Recorder::new("digest", settings))
            .store(store.clone())
            .build()
            .unwrap(),
    );

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let handler = handler.clone();
            tokio::task::spawn_blocking(move || handler.handle(&high(&format!("app-{}", i))))
        })
        .collect();
    for task in tasks {
        let outcomes = task.await.unwrap().unwrap();
        assert_eq!(outcomes[0].delivery, Delivery::Queued);
    }

    assert_eq!(handler.scheduler().running(), 1);
    assert_eq!(store.pending("digest").unwrap(), 16);
    handler.shutdown().await;
}

#[tokio::test]
async fn test_store_failure_skips_subscriber() {
    let settings = SubscriberSettings {
        aggregate_issues_number: 2,
        ..Default::default()
    };
    let recorder = Recorder::new("jira", settings);
    let direct = Recorder::new("direct", SubscriberSettings::default());
    let handler = ScanHandler::builder()
        .subscriber(recorder.clone())
        .subscriber(direct.clone())
        .store(Arc::new(BrokenStore))
        .build()
        .unwrap();

    let outcomes = handler.handle(&high("app")).unwrap();
    assert_eq!(outcomes[0].delivery, Delivery::StoreFailed);
    assert_eq!(outcomes[1].delivery, Delivery::Dispatched { items: 1 });

    handler.shutdown().await;
    assert!(recorder.sent().is_empty());
    assert_eq!(direct.sent().len(), 1);
}

#[tokio::test]
async fn test_time_store_failure_still_starts_scheduler() {
    let settings = SubscriberSettings {
        aggregate_timeout_seconds: 3600,
        ..Default::default()
    };
    let recorder = Recorder::new("digest", settings);
    let handler = ScanHandler::builder()
        .subscriber(recorder.clone())
        .store(Arc::new(BrokenStore))
        .build()
        .unwrap();

    let outcomes = handler.handle(&high("app")).unwrap();
    assert_eq!(outcomes[0].delivery, Delivery::StoreFailed);
    assert!(handler.scheduler().is_started("digest"));
    assert_eq!(handler.flush_all(), 0);

    handler.shutdown().await;
    assert!(recorder.sent().is_empty());
}

#[tokio::test]
async fn test_unflushed_reports_count_only_queues() {
    let count_only = Recorder::new(
        "jira",
        SubscriberSettings {
            aggregate_issues_number: 3,
            ..Default::default()
        },
    );
    let timed = Recorder::new(
        "digest",
        SubscriberSettings {
            aggregate_issues_number: 3,
            aggregate_timeout_seconds: 3600,
            ..Default::default()
        },
    );
    let handler = handler_for(&[&count_only, &timed]);
    assert!(handler.unflushed().is_empty());

    handler.handle(&high("app-a")).unwrap();
    handler.handle(&high("app-b")).unwrap();

    // 有定时刷新的订阅者不算在内
    assert_eq!(handler.unflushed(), vec![("jira".to_string(), 2)]);

    handler.shutdown().await;
}

#[tokio::test]
async fn test_subscribers_are_independent() {
    let strict = Recorder::new(
        "strict",
        SubscriberSettings {
            policy_min_vulnerability: Some(Severity::Critical),
            ..Default::default()
        },
    );
    let relaxed = Recorder::new("relaxed", SubscriberSettings::default());
    let handler = handler_for(&[&strict, &relaxed]);

    let outcomes = handler.handle(&high("app")).unwrap();
    assert_eq!(outcomes[0].subscriber, "strict");
    assert!(matches!(outcomes[0].delivery, Delivery::Rejected(_)));
    assert_eq!(outcomes[1].subscriber, "relaxed");
    assert_eq!(outcomes[1].delivery, Delivery::Dispatched { items: 1 });

    handler.shutdown().await;
    assert!(strict.sent().is_empty());
    assert_eq!(relaxed.sent().len(), 1);
}

#[tokio::test]
async fn test_dry_run_evaluates_without_sending() {
    let recorder = Recorder::new("jira", SubscriberSettings::default());
    let handler = ScanHandler::builder()
        .subscriber(recorder.clone())
        .dry_run(true)
        .build()
        .unwrap();

    let outcomes = handler.handle(&high("app")).unwrap();
    assert_eq!(outcomes[0].delivery, Delivery::Dispatched { items: 1 });

    handler.shutdown().await;
    assert!(recorder.sent().is_empty());
}

#[tokio::test]
async fn test_malformed_scan_is_dropped() {
    let recorder = Recorder::new("jira", SubscriberSettings::default());
    let handler = handler_for(&[&recorder]);

    assert!(handler.handle("not json").is_err());
    assert!(handler.handle(r#"{"image": 1}"#).is_err());

    handler.shutdown().await;
    assert!(recorder.sent().is_empty());
}
