//! Scan Relay - 把容器漏洞扫描结果按订阅者策略过滤、聚合后发送

pub mod aggregation;
pub mod cli;
pub mod config;
pub mod error;
pub mod handler;
pub mod infra;
pub mod notification;
pub mod policy;
pub mod scan;
pub mod subscriber;

pub use aggregation::{AggregationStore, FileAggregationStore, FlushScheduler, MemoryAggregationStore};
pub use config::{BackendConfig, RelayConfig, SubscriberConfig};
pub use error::{RelayError, Result};
pub use handler::{Delivery, ScanHandler, ScanHandlerBuilder, SubscriberOutcome};
pub use notification::{Dispatcher, LayoutKind, LayoutProvider, NotificationContent};
pub use policy::{GateDecision, PatternEngine, PatternSyntax, PolicyEvaluator, PolicyGate, RejectReason};
pub use scan::{ObservedScan, ScanHistory, ScanParser, ScanResult, Severity, SeverityCounts};
pub use subscriber::{Subscriber, SubscriberSettings};
