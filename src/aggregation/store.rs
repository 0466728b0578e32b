//! 聚合队列存储
//!
//! 每个订阅者一个队列；追加与（可能的）清空作为同一个原子操作执行。

use crate::error::{RelayError, Result};
use crate::infra::LockedJsonFile;
use crate::notification::NotificationContent;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;

/// 聚合队列存储
pub trait AggregationStore: Send + Sync {
    /// 追加内容并按阈值决定是否返回整批
    ///
    /// - `item` 为 None 时不追加
    /// - `ignore_length` 为 true 时只入队，永远返回空
    /// - 队列长度达到 `threshold` 时返回全部内容并清空队列；否则返回空
    ///
    /// 因此 `accept(key, None, 0, false)` 会无条件清空并返回当前队列
    fn accept(
        &self,
        subscriber: &str,
        item: Option<NotificationContent>,
        threshold: usize,
        ignore_length: bool,
    ) -> Result<Vec<NotificationContent>>;

    /// 当前排队数量
    fn pending(&self, subscriber: &str) -> Result<usize>;

    /// 清空并返回队列
    fn drain(&self, subscriber: &str) -> Result<Vec<NotificationContent>> {
        self.accept(subscriber, None, 0, false)
    }
}

/// 队列状态转换
pub fn accept_into<T>(
    bucket: &mut Vec<T>,
    item: Option<T>,
    threshold: usize,
    ignore_length: bool,
) -> Vec<T> {
    if let Some(item) = item {
        bucket.push(item);
    }
    if ignore_length || bucket.len() < threshold {
        return Vec::new();
    }
    std::mem::take(bucket)
}

/// 内存聚合存储（按订阅者加锁）
#[derive(Debug, Default)]
pub struct MemoryAggregationStore {
    buckets: DashMap<String, Vec<NotificationContent>>,
}

impl MemoryAggregationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregationStore for MemoryAggregationStore {
    fn accept(
        &self,
        subscriber: &str,
        item: Option<NotificationContent>,
        threshold: usize,
        ignore_length: bool,
    ) -> Result<Vec<NotificationContent>> {
        // entry 持有该键的写锁直到本次操作结束
        let mut bucket = self.buckets.entry(subscriber.to_string()).or_default();
        Ok(accept_into(bucket.value_mut(), item, threshold, ignore_length))
    }

    fn pending(&self, subscriber: &str) -> Result<usize> {
        Ok(self.buckets.get(subscriber).map(|b| b.len()).unwrap_or(0))
    }
}

/// 文件聚合存储（跨进程共享，重启后保留队列）
#[derive(Debug, Clone)]
pub struct FileAggregationStore {
    file: LockedJsonFile,
}

type Buckets = HashMap<String, Vec<NotificationContent>>;

impl FileAggregationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: LockedJsonFile::new(path),
        }
    }
}

impl AggregationStore for FileAggregationStore {
    fn accept(
        &self,
        subscriber: &str,
        item: Option<NotificationContent>,
        threshold: usize,
        ignore_length: bool,
    ) -> Result<Vec<NotificationContent>> {
        self.file
            .update(|buckets: &mut Buckets| {
                let bucket = buckets.entry(subscriber.to_string()).or_default();
                let batch = accept_into(bucket, item, threshold, ignore_length);
                if bucket.is_empty() {
                    buckets.remove(subscriber);
                }
                batch
            })
            .map_err(|e| RelayError::store(subscriber, e.to_string()))
    }

    fn pending(&self, subscriber: &str) -> Result<usize> {
        let buckets: Buckets = self
            .file
            .read()
            .map_err(|e| RelayError::store(subscriber, e.to_string()))?;
        Ok(buckets.get(subscriber).map(Vec::len).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(n: usize) -> NotificationContent {
        NotificationContent {
            title: format!("scan {}", n),
            description: String::new(),
            url: format!("registry/app{}", n),
            src: None,
            owners: None,
        }
    }

    #[test]
    fn test_accept_into_threshold() {
        let mut bucket = Vec::new();
        assert!(accept_into(&mut bucket, Some(1), 3, false).is_empty());
        assert!(accept_into(&mut bucket, Some(2), 3, false).is_empty());
        assert_eq!(accept_into(&mut bucket, Some(3), 3, false), vec![1, 2, 3]);
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_accept_into_ignore_length_always_queues() {
        let mut bucket = Vec::new();
        for i in 0..5 {
            assert!(accept_into(&mut bucket, Some(i), 0, true).is_empty());
        }
        assert_eq!(bucket.len(), 5);
    }

    #[test]
    fn test_accept_into_drain() {
        let mut bucket = vec![1];
        assert_eq!(accept_into(&mut bucket, None, 0, false), vec![1]);
        assert!(accept_into(&mut bucket, None, 0, false).is_empty());
    }

    fn assert_store_semantics(store: &dyn AggregationStore) {
        assert!(store.accept("jira", Some(content(1)), 2, false).unwrap().is_empty());
        assert_eq!(store.pending("jira").unwrap(), 1);
        assert_eq!(store.pending("slack").unwrap(), 0);

        let batch = store.accept("jira", Some(content(2)), 2, false).unwrap();
        assert_eq!(batch, vec![content(1), content(2)]);
        assert_eq!(store.pending("jira").unwrap(), 0);

        store.accept("slack", Some(content(3)), 0, true).unwrap();
        store.accept("slack", Some(content(4)), 0, true).unwrap();
        assert!(store.accept("jira", Some(content(5)), 0, true).unwrap().is_empty());

        assert_eq!(store.drain("slack").unwrap(), vec![content(3), content(4)]);
        assert!(store.drain("slack").unwrap().is_empty());
        assert_eq!(store.pending("jira").unwrap(), 1);
    }

    #[test]
    fn test_memory_store() {
        assert_store_semantics(&MemoryAggregationStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        assert_store_semantics(&FileAggregationStore::new(dir.path().join("aggregation.json")));
    }

    #[test]
    fn test_file_store_persists_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aggregation.json");

        FileAggregationStore::new(&path)
            .accept("jira", Some(content(1)), 0, true)
            .unwrap();
        let reopened = FileAggregationStore::new(&path);
        assert_eq!(reopened.drain("jira").unwrap(), vec![content(1)]);
    }

    #[test]
    fn test_memory_store_concurrent_appends_lose_nothing() {
        let store = std::sync::Arc::new(MemoryAggregationStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut delivered = 0;
                    for i in 0..50 {
                        delivered += store
                            .accept("jira", Some(content(t * 100 + i)), 4, false)
                            .unwrap()
                            .len();
                    }
                    delivered
                })
            })
            .collect();

        let delivered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(delivered + store.pending("jira").unwrap(), 400);
        assert_eq!(delivered % 4, 0);
    }
}
