//! 聚合层 - 按数量/按时间批量发送

pub mod scheduler;
pub mod store;

pub use scheduler::{flush_queue, FlushScheduler};
pub use store::{accept_into, AggregationStore, FileAggregationStore, MemoryAggregationStore};
