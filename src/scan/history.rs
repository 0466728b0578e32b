//! 扫描历史 - 判断扫描结果是否为新状态，并返回上一次的结果

use super::ScanResult;
use crate::error::{RelayError, Result};
use crate::infra::LockedJsonFile;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// 历史比对结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// 上一次记录的原始结果（JSON）
    pub previous_raw: Option<String>,
    /// 与上一次记录不同（或首次出现）
    pub is_new: bool,
}

/// 扫描历史存储
pub trait ScanHistory: Send + Sync {
    /// 比对并记录当前结果
    ///
    /// 与上次记录完全相同则 `is_new == false` 且不返回历史；
    /// 否则记录当前结果并返回之前的记录
    fn observe(&self, scan: &ScanResult) -> Result<Observation>;
}

fn canonical(scan: &ScanResult) -> Result<String> {
    serde_json::to_string(scan).map_err(|e| RelayError::History(e.to_string()))
}

fn compare_and_record(slot: Option<&mut String>, current: String) -> (Observation, Option<String>) {
    match slot {
        Some(prev) if *prev == current => (Observation::default(), None),
        Some(prev) => {
            let previous = std::mem::replace(prev, current);
            (
                Observation {
                    previous_raw: Some(previous),
                    is_new: true,
                },
                None,
            )
        }
        None => (
            Observation {
                previous_raw: None,
                is_new: true,
            },
            Some(current),
        ),
    }
}

/// 内存扫描历史（进程内有效）
#[derive(Debug, Default)]
pub struct MemoryScanHistory {
    records: DashMap<String, String>,
}

impl MemoryScanHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ScanHistory for MemoryScanHistory {
    fn observe(&self, scan: &ScanResult) -> Result<Observation> {
        let current = canonical(scan)?;
        let mut entry = self.records.entry(scan.unique_id()).or_default();
        let slot = if entry.is_empty() { None } else { Some(entry.value_mut()) };
        let (observation, insert) = compare_and_record(slot, current);
        if let Some(value) = insert {
            *entry = value;
        }
        Ok(observation)
    }
}

/// 文件扫描历史（跨进程共享，带文件锁）
#[derive(Debug, Clone)]
pub struct FileScanHistory {
    file: LockedJsonFile,
}

impl FileScanHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: LockedJsonFile::new(path),
        }
    }
}

impl ScanHistory for FileScanHistory {
    fn observe(&self, scan: &ScanResult) -> Result<Observation> {
        let id = scan.unique_id();
        let current = canonical(scan)?;

        let observation = self
            .file
            .update(|records: &mut HashMap<String, String>| {
                let (observation, insert) = compare_and_record(records.get_mut(&id), current);
                if let Some(value) = insert {
                    records.insert(id.clone(), value);
                }
                observation
            })
            .map_err(|e| RelayError::History(e.to_string()))?;

        debug!(scan = %id, is_new = observation.is_new, "Scan observed");
        Ok(observation)
    }
}
