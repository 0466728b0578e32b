//! 本地文件订阅者 - 将通知追加写入 JSONL 文件

use super::{Subscriber, SubscriberSettings};
use crate::notification::{LayoutProvider, NotificationContent};
use anyhow::Result;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// 通知记录（JSONL 格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// ISO8601 时间戳
    pub ts: DateTime<Utc>,
    pub subscriber: String,
    pub title: String,
    pub url: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owners: Option<String>,
}

/// 本地文件订阅者
pub struct LocalFileSubscriber {
    name: String,
    path: PathBuf,
    settings: SubscriberSettings,
    layout: Arc<dyn LayoutProvider>,
}

impl LocalFileSubscriber {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        settings: SubscriberSettings,
        layout: Arc<dyn LayoutProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            settings,
            layout,
        }
    }

    /// 读取已写入的记录
    pub fn read_records(&self) -> Vec<NotificationRecord> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }
}

impl Subscriber for LocalFileSubscriber {
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
        let record = NotificationRecord {
            ts: Utc::now(),
            subscriber: self.name.clone(),
            title: content.title.clone(),
            url: content.url.clone(),
            description: content.description.clone(),
            owners: content.owners.clone(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.lock_exclusive()?;
        let written = writeln!(file, "{}", serde_json::to_string(&record)?);
        file.unlock()?;
        written?;

        debug!(subscriber = %self.name, path = %self.path.display(), "Notification recorded to local file");
        Ok(())
    }
}
