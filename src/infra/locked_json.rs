//! 带文件锁的 JSON 文件读写
//!
//! 整个 读取-修改-写回 过程持有独占锁，多个进程共享同一文件时不会丢失更新。

use crate::error::Result;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// 单个 JSON 文档文件
#[derive(Debug, Clone)]
pub struct LockedJsonFile {
    path: PathBuf,
}

impl LockedJsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 在独占锁内读取文档、执行修改并写回
    ///
    /// 文件不存在或为空时从 `T::default()` 开始
    pub fn update<T, R, F>(&self, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        file.lock_exclusive()?;
        let result = Self::update_locked(&mut file, f);
        file.unlock()?;
        result
    }

    /// 在共享锁内读取文档
    pub fn read<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !self.path.exists() {
            return Ok(T::default());
        }

        let mut file = File::open(&self.path)?;
        file.lock_shared()?;
        let result = Self::read_document(&mut file);
        file.unlock()?;
        result
    }

    fn update_locked<T, R, F>(file: &mut File, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let mut document: T = Self::read_document(file)?;
        let result = f(&mut document);

        let bytes = serde_json::to_vec(&document)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bytes)?;
        file.sync_data()?;

        Ok(result)
    }

    fn read_document<T: DeserializeOwned + Default>(file: &mut File) -> Result<T> {
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_str(&content)?)
    }
}
