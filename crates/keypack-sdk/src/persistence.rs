//! 持久化适配层
//!
//! 职责：
//! - 按粒度分发批量写入与清理
//! - 小时桶键在 delta 计算中是字符串，在持久化层转回整数
//! - 把底层存储错误归类为对调用方可见的错误：
//!   磁盘满 → `NoDiskSpace`，其余已知存储故障 → `UnableToWriteDiagnosisKeys`，
//!   未识别的错误类同样映射为 `UnableToWriteDiagnosisKeys` 并按「未预期」记录日志
//! - 清理是尽力而为的：失败只记日志，不中断本轮同步

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{KeypackSDKError, Result};
use crate::package::{Granularity, PackageBlob};
use crate::storage::{ConfigStore, PackageStore};

/// 持久化适配器
#[derive(Debug, Clone)]
pub struct PersistenceAdapter {
    store: Arc<dyn PackageStore>,
    config: Arc<dyn ConfigStore>,
}

impl PersistenceAdapter {
    /// 创建持久化适配器
    pub fn new(store: Arc<dyn PackageStore>, config: Arc<dyn ConfigStore>) -> Self {
        Self { store, config }
    }

    /// 批量写入一轮同步拉取到的密钥包
    ///
    /// 对调用方来说写入是事务性的：整批要么全部落盘要么一个都不落。
    /// 成功后记录「最近一次成功下载」时间戳。
    pub async fn persist(
        &self,
        packages: HashMap<String, PackageBlob>,
        granularity: &Granularity,
        country: &str,
    ) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let count = packages.len();
        let result = match granularity {
            Granularity::Daily => self.store.add_fetched_days(packages, country).await,
            Granularity::Hourly { day_key } => {
                let mut by_hour = HashMap::with_capacity(count);
                for (key, blob) in packages {
                    let hour = match parse_hour_key(&key) {
                        Some(hour) => hour,
                        None => {
                            // 服务器侧不应产生非法小时键，按未预期的存储输入处理
                            error!("非法的小时桶键: country={} key={}", country, key);
                            return Err(KeypackSDKError::UnableToWriteDiagnosisKeys);
                        }
                    };
                    by_hour.insert(hour, blob);
                }
                self.store.add_fetched_hours(by_hour, day_key, country).await
            }
        };

        match result {
            Ok(()) => {
                debug!("密钥包持久化完成: country={} granularity={} count={}", country, granularity, count);
                let now = chrono::Utc::now().timestamp_millis();
                if let Err(e) = self.config.set_last_key_package_download_date(now).await {
                    // 时间戳只是辅助信息，写入失败不影响本轮结果
                    warn!("记录下载时间戳失败: {}", e);
                }
                Ok(())
            }
            Err(e) => Err(classify_storage_error(e, country)),
        }
    }

    /// 删除服务器已撤回的本地密钥包（尽力而为）
    ///
    /// 单个键的删除失败只记日志：残留的过期数据会在下一轮同步时自愈。
    /// 键不存在时删除是无操作（小时包可能已随天级包被连带删除）。
    pub async fn prune(&self, keys: &HashSet<String>, granularity: &Granularity, country: &str) {
        for key in keys {
            let result = match granularity {
                Granularity::Daily => self.store.delete_day_package(key, country).await,
                Granularity::Hourly { day_key } => match parse_hour_key(key) {
                    Some(hour) => self.store.delete_hour_package(day_key, hour, country).await,
                    None => {
                        warn!("跳过非法的小时桶键: country={} key={}", country, key);
                        continue;
                    }
                },
            };

            if let Err(e) = result {
                warn!("清理过期密钥包失败: country={} key={} error={}", country, key, e);
            } else {
                debug!("已清理过期密钥包: country={} granularity={} key={}", country, granularity, key);
            }
        }
    }
}

fn parse_hour_key(key: &str) -> Option<u32> {
    key.parse::<u32>().ok().filter(|h| *h < 24)
}

/// 把存储层错误归类为调用方可见的错误
fn classify_storage_error(error: KeypackSDKError, country: &str) -> KeypackSDKError {
    match &error {
        KeypackSDKError::SqliteError(rusqlite::Error::SqliteFailure(ffi_err, _))
            if ffi_err.code == rusqlite::ErrorCode::DiskFull =>
        {
            warn!("存储介质已满: country={} error={}", country, error);
            KeypackSDKError::NoDiskSpace
        }
        KeypackSDKError::SqliteError(_)
        | KeypackSDKError::Database(_)
        | KeypackSDKError::IO(_) => {
            warn!("密钥包写入失败: country={} error={}", country, error);
            KeypackSDKError::UnableToWriteDiagnosisKeys
        }
        _ => {
            // 未识别的存储错误类：需要在日志/遥测中与已知类区分开
            error!("未预期的存储错误类: country={} error={}", country, error);
            KeypackSDKError::UnableToWriteDiagnosisKeys
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqlitePackageStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    fn disk_full_error() -> KeypackSDKError {
        KeypackSDKError::SqliteError(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            Some("database or disk is full".to_string()),
        ))
    }

    #[test]
    fn test_disk_full_maps_to_no_disk_space() {
        let classified = classify_storage_error(disk_full_error(), "EUR");
        assert!(matches!(classified, KeypackSDKError::NoDiskSpace));
    }

    #[test]
    fn test_known_storage_faults_map_to_unable_to_write() {
        let classified =
            classify_storage_error(KeypackSDKError::Database("corrupt page".to_string()), "EUR");
        assert!(matches!(classified, KeypackSDKError::UnableToWriteDiagnosisKeys));

        let classified =
            classify_storage_error(KeypackSDKError::IO("read-only filesystem".to_string()), "EUR");
        assert!(matches!(classified, KeypackSDKError::UnableToWriteDiagnosisKeys));
    }

    #[test]
    fn test_unrecognized_error_class_maps_to_unable_to_write() {
        let classified =
            classify_storage_error(KeypackSDKError::Config("weird".to_string()), "EUR");
        assert!(matches!(classified, KeypackSDKError::UnableToWriteDiagnosisKeys));
    }

    #[test]
    fn test_parse_hour_key() {
        assert_eq!(parse_hour_key("0"), Some(0));
        assert_eq!(parse_hour_key("23"), Some(23));
        assert_eq!(parse_hour_key("24"), None);
        assert_eq!(parse_hour_key("abc"), None);
        assert_eq!(parse_hour_key("2021-01-10"), None);
    }

    /// 写入固定失败的存储（用于错误分类链路测试）
    #[derive(Debug)]
    struct FailingStore {
        error: Mutex<Option<KeypackSDKError>>,
    }

    #[async_trait]
    impl PackageStore for FailingStore {
        async fn all_days(&self, _country: &str) -> Result<std::collections::HashSet<String>> {
            Ok(Default::default())
        }

        async fn hours_for_day(
            &self,
            _day_key: &str,
            _country: &str,
        ) -> Result<std::collections::HashSet<u32>> {
            Ok(Default::default())
        }

        async fn add_fetched_days(
            &self,
            _packages: HashMap<String, PackageBlob>,
            _country: &str,
        ) -> Result<()> {
            Err(self.error.lock().await.take().expect("error already taken"))
        }

        async fn add_fetched_hours(
            &self,
            _packages: HashMap<u32, PackageBlob>,
            _day_key: &str,
            _country: &str,
        ) -> Result<()> {
            Err(self.error.lock().await.take().expect("error already taken"))
        }

        async fn delete_day_package(&self, _day_key: &str, _country: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_hour_package(
            &self,
            _day_key: &str,
            _hour: u32,
            _country: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct NoopConfig;

    #[async_trait]
    impl crate::storage::ConfigStore for NoopConfig {
        async fn was_recent_day_key_download_successful(&self) -> Result<bool> {
            Ok(false)
        }
        async fn set_was_recent_day_key_download_successful(&self, _successful: bool) -> Result<()> {
            Ok(())
        }
        async fn was_recent_hour_key_download_successful(&self) -> Result<bool> {
            Ok(false)
        }
        async fn set_was_recent_hour_key_download_successful(&self, _successful: bool) -> Result<()> {
            Ok(())
        }
        async fn last_key_package_download_date(&self) -> Result<Option<i64>> {
            Ok(None)
        }
        async fn set_last_key_package_download_date(&self, _timestamp_millis: i64) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_persist_propagates_classified_disk_full() {
        let adapter = PersistenceAdapter::new(
            Arc::new(FailingStore { error: Mutex::new(Some(disk_full_error())) }),
            Arc::new(NoopConfig),
        );

        let mut packages = HashMap::new();
        packages.insert(
            "2021-01-10".to_string(),
            PackageBlob::new(Bytes::from_static(b"pkg"), None),
        );

        let err = adapter.persist(packages, &Granularity::Daily, "EUR").await.unwrap_err();
        assert!(matches!(err, KeypackSDKError::NoDiskSpace));
    }

    #[tokio::test]
    async fn test_persist_and_prune_roundtrip_with_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqlitePackageStore::new(temp_dir.path()).await.unwrap());
        let adapter = PersistenceAdapter::new(store.clone(), Arc::new(NoopConfig));

        let mut packages = HashMap::new();
        packages.insert("3".to_string(), PackageBlob::new(Bytes::from_static(b"h3"), None));
        packages.insert("4".to_string(), PackageBlob::new(Bytes::from_static(b"h4"), None));

        let hourly = Granularity::Hourly { day_key: "2021-01-10".to_string() };
        adapter.persist(packages, &hourly, "EUR").await.unwrap();

        let hours = store.hours_for_day("2021-01-10", "EUR").await.unwrap();
        assert_eq!(hours, [3u32, 4u32].into_iter().collect());

        // 清理一个存在的和一个不存在的键都不报错
        let keys: HashSet<String> = ["3".to_string(), "17".to_string()].into_iter().collect();
        adapter.prune(&keys, &hourly, "EUR").await;

        let hours = store.hours_for_day("2021-01-10", "EUR").await.unwrap();
        assert_eq!(hours, [4u32].into_iter().collect());
    }

    #[tokio::test]
    async fn test_persist_rejects_invalid_hour_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqlitePackageStore::new(temp_dir.path()).await.unwrap());
        let adapter = PersistenceAdapter::new(store, Arc::new(NoopConfig));

        let mut packages = HashMap::new();
        packages.insert("not-an-hour".to_string(), PackageBlob::new(Bytes::from_static(b"x"), None));

        let hourly = Granularity::Hourly { day_key: "2021-01-10".to_string() };
        let err = adapter.persist(packages, &hourly, "EUR").await.unwrap_err();
        assert!(matches!(err, KeypackSDKError::UnableToWriteDiagnosisKeys));
    }
}
