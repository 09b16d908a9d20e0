//! KV 存储模块 - 基于 sled 的同步标志存储
//!
//! 本模块提供：
//! - 两个按粒度区分的「上次同步是否成功」标志
//! - 最近一次成功下载的时间戳
//! - serde_json 编码的类型安全读写

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sled::Db;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{KeypackSDKError, Result};
use crate::storage::{config_keys, ConfigStore};

/// 基于 sled 的同步标志存储组件
#[derive(Debug)]
pub struct SledConfigStore {
    #[allow(dead_code)]
    base_path: PathBuf,
    db: Arc<Db>,
}

impl SledConfigStore {
    /// 在指定目录下创建（或打开）标志数据库
    pub async fn new(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| KeypackSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 打开 sled 数据库（上一个实例可能刚释放锁，重试多次带退避）
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            KeypackSDKError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        Ok(Self {
            base_path,
            db: Arc::new(db),
        })
    }

    /// 落盘所有未刷新的写入（关闭 SDK 时调用）
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| KeypackSDKError::KvStore(format!("刷新 sled 数据库失败: {}", e)))?;
        Ok(())
    }

    fn set<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| KeypackSDKError::Serialization(format!("序列化值失败: {}", e)))?;

        self.db
            .insert(key, value_bytes)
            .map_err(|e| KeypackSDKError::KvStore(format!("设置键值对失败: {}", e)))?;

        Ok(())
    }

    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let result = self
            .db
            .get(key)
            .map_err(|e| KeypackSDKError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| KeypackSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ConfigStore for SledConfigStore {
    async fn was_recent_day_key_download_successful(&self) -> Result<bool> {
        Ok(self
            .get::<bool>(config_keys::RECENT_DAY_DOWNLOAD_SUCCESSFUL)?
            .unwrap_or(false))
    }

    async fn set_was_recent_day_key_download_successful(&self, successful: bool) -> Result<()> {
        self.set(config_keys::RECENT_DAY_DOWNLOAD_SUCCESSFUL, &successful)
    }

    async fn was_recent_hour_key_download_successful(&self) -> Result<bool> {
        Ok(self
            .get::<bool>(config_keys::RECENT_HOUR_DOWNLOAD_SUCCESSFUL)?
            .unwrap_or(false))
    }

    async fn set_was_recent_hour_key_download_successful(&self, successful: bool) -> Result<()> {
        self.set(config_keys::RECENT_HOUR_DOWNLOAD_SUCCESSFUL, &successful)
    }

    async fn last_key_package_download_date(&self) -> Result<Option<i64>> {
        self.get::<i64>(config_keys::LAST_KEY_PACKAGE_DOWNLOAD_DATE)
    }

    async fn set_last_key_package_download_date(&self, timestamp_millis: i64) -> Result<()> {
        self.set(config_keys::LAST_KEY_PACKAGE_DOWNLOAD_DATE, &timestamp_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_flags_default_to_false() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledConfigStore::new(temp_dir.path()).await.unwrap();

        assert!(!store.was_recent_day_key_download_successful().await.unwrap());
        assert!(!store.was_recent_hour_key_download_successful().await.unwrap());
        assert_eq!(store.last_key_package_download_date().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flag_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledConfigStore::new(temp_dir.path()).await.unwrap();

        store.set_was_recent_day_key_download_successful(true).await.unwrap();
        assert!(store.was_recent_day_key_download_successful().await.unwrap());
        // 两个粒度的标志互不影响
        assert!(!store.was_recent_hour_key_download_successful().await.unwrap());

        store.set_was_recent_day_key_download_successful(false).await.unwrap();
        assert!(!store.was_recent_day_key_download_successful().await.unwrap());

        store.set_last_key_package_download_date(1_610_236_800_000).await.unwrap();
        assert_eq!(
            store.last_key_package_download_date().await.unwrap(),
            Some(1_610_236_800_000)
        );

        store.flush().await.unwrap();
    }
}
