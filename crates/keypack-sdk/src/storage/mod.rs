//! 存储模块 - 密钥包与同步标志的本地持久化
//!
//! 分层设计：
//! - [`PackageStore`]: 密钥包存储能力（SQLite 实现见 [`sqlite`]）
//! - [`ConfigStore`]: 进程级同步标志存储能力（sled 实现见 [`kv`]）
//! - 上层通过 trait 访问，测试可注入内存实现

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::package::PackageBlob;

pub mod kv;
pub mod sqlite;

pub use kv::SledConfigStore;
pub use sqlite::SqlitePackageStore;

/// 配置键常量
pub mod config_keys {
    /// 上一次天级同步是否整体成功
    pub const RECENT_DAY_DOWNLOAD_SUCCESSFUL: &str = "was_recent_day_key_download_successful";
    /// 上一次小时级同步是否整体成功
    pub const RECENT_HOUR_DOWNLOAD_SUCCESSFUL: &str = "was_recent_hour_key_download_successful";
    /// 最近一次成功下载的 UTC 毫秒时间戳
    pub const LAST_KEY_PACKAGE_DOWNLOAD_DATE: &str = "last_key_package_download_date";
}

/// 密钥包存储能力
///
/// 天级包以日键索引，小时级包以 (日键, 小时) 索引。
/// 内部访问自行串行化，上层不加额外锁。
#[async_trait]
pub trait PackageStore: Send + Sync + std::fmt::Debug {
    /// 本地已存储的全部天级桶键
    async fn all_days(&self, country: &str) -> Result<HashSet<String>>;

    /// 某一天内本地已存储的全部小时键
    async fn hours_for_day(&self, day_key: &str, country: &str) -> Result<HashSet<u32>>;

    /// 批量写入天级密钥包（整体成功或整体失败）
    async fn add_fetched_days(
        &self,
        packages: HashMap<String, PackageBlob>,
        country: &str,
    ) -> Result<()>;

    /// 批量写入小时级密钥包（整体成功或整体失败）
    async fn add_fetched_hours(
        &self,
        packages: HashMap<u32, PackageBlob>,
        day_key: &str,
        country: &str,
    ) -> Result<()>;

    /// 删除一个天级包（连带该日的小时包；键不存在时为无操作）
    async fn delete_day_package(&self, day_key: &str, country: &str) -> Result<()>;

    /// 删除一个小时级包（键不存在时为无操作）
    async fn delete_hour_package(&self, day_key: &str, hour: u32, country: &str) -> Result<()>;
}

/// 同步标志存储能力
///
/// 两个成功标志只由同步编排器在一轮同步结束时写入。
#[async_trait]
pub trait ConfigStore: Send + Sync + std::fmt::Debug {
    /// 上一次天级同步是否整体成功（未写入过时为 false）
    async fn was_recent_day_key_download_successful(&self) -> Result<bool>;

    /// 写入天级同步结果标志
    async fn set_was_recent_day_key_download_successful(&self, successful: bool) -> Result<()>;

    /// 上一次小时级同步是否整体成功（未写入过时为 false）
    async fn was_recent_hour_key_download_successful(&self) -> Result<bool>;

    /// 写入小时级同步结果标志
    async fn set_was_recent_hour_key_download_successful(&self, successful: bool) -> Result<()>;

    /// 最近一次成功下载的 UTC 毫秒时间戳
    async fn last_key_package_download_date(&self) -> Result<Option<i64>>;

    /// 写入最近一次成功下载的时间戳
    async fn set_last_key_package_download_date(&self, timestamp_millis: i64) -> Result<()>;
}
