//! SDK 入口 - 配置与装配
//!
//! 职责：
//! - 配置构建器（数据目录、CDN 地址、国家列表、HTTP 超时）
//! - 初始化并装配各组件：SQLite 包存储 + sled 标志存储 +
//!   HTTP 拉取客户端（含受限变体）+ 同步编排器
//! - 关闭时落盘

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::download_status::{DownloadStatus, DownloadStatusEvent};
use crate::error::{KeypackSDKError, Result};
use crate::fetcher::{HttpFetcherConfig, HttpPackageFetcher, RestrictedPackageFetcher};
use crate::network::{AlwaysUnrestricted, NetworkStatusListener};
use crate::package::DEFAULT_COUNTRY;
use crate::storage::{ConfigStore, SledConfigStore, SqlitePackageStore};
use crate::sync::KeyPackageDownloader;
use crate::time_keys::UtcClock;
use crate::version::SDK_VERSION;

/// SDK 配置
#[derive(Debug, Clone)]
pub struct KeypackConfig {
    /// 本地数据目录（SQLite 与 sled 都在其下）
    pub data_dir: PathBuf,
    /// CDN 分发服务的基础 URL
    pub base_url: String,
    /// 国家列表（固定顺序；空则使用默认大区聚合）
    pub countries: Vec<String>,
    /// HTTP 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// HTTP 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
    /// 网络策略监听器（缺省视为始终不计费）
    pub network_listener: Option<Arc<dyn NetworkStatusListener>>,
}

impl KeypackConfig {
    /// 创建配置构建器
    pub fn builder() -> KeypackConfigBuilder {
        KeypackConfigBuilder::default()
    }
}

/// SDK 配置构建器
#[derive(Debug, Default)]
pub struct KeypackConfigBuilder {
    data_dir: Option<PathBuf>,
    base_url: Option<String>,
    countries: Vec<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    network_listener: Option<Arc<dyn NetworkStatusListener>>,
}

impl KeypackConfigBuilder {
    /// 设置本地数据目录
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// 设置 CDN 分发服务的基础 URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// 追加一个国家
    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.countries.push(country.into());
        self
    }

    /// 设置完整的国家列表（覆盖已追加的）
    pub fn countries(mut self, countries: Vec<String>) -> Self {
        self.countries = countries;
        self
    }

    /// 设置 HTTP 连接超时（秒）
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// 设置 HTTP 请求超时（秒）
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// 注入平台层的网络策略监听器
    pub fn network_listener(mut self, listener: Arc<dyn NetworkStatusListener>) -> Self {
        self.network_listener = Some(listener);
        self
    }

    /// 构建配置
    pub fn build(self) -> KeypackConfig {
        KeypackConfig {
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("keypack-data")),
            base_url: self.base_url.unwrap_or_default(),
            countries: if self.countries.is_empty() {
                vec![DEFAULT_COUNTRY.to_string()]
            } else {
                self.countries
            },
            connect_timeout_secs: self.connect_timeout_secs.or(Some(10)),
            request_timeout_secs: self.request_timeout_secs.or(Some(30)),
            network_listener: self.network_listener,
        }
    }
}

/// 密钥包同步 SDK
#[derive(Debug)]
pub struct KeypackSDK {
    config: KeypackConfig,
    config_store: Arc<SledConfigStore>,
    downloader: KeyPackageDownloader,
}

impl KeypackSDK {
    /// 初始化 SDK：打开本地存储并装配同步编排器
    pub async fn initialize(config: KeypackConfig) -> Result<Arc<Self>> {
        if config.base_url.is_empty() {
            return Err(KeypackSDKError::Config("base_url 不能为空".to_string()));
        }

        let package_store = Arc::new(SqlitePackageStore::new(&config.data_dir).await?);
        let config_store = Arc::new(SledConfigStore::new(&config.data_dir).await?);

        let fetcher = Arc::new(HttpPackageFetcher::new(&HttpFetcherConfig {
            base_url: config.base_url.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
            request_timeout_secs: config.request_timeout_secs,
        })?);

        let listener: Arc<dyn NetworkStatusListener> = config
            .network_listener
            .clone()
            .unwrap_or_else(|| Arc::new(AlwaysUnrestricted));
        let restricted_fetcher =
            Arc::new(RestrictedPackageFetcher::new(fetcher.clone(), listener));

        let downloader = KeyPackageDownloader::new(
            fetcher,
            restricted_fetcher,
            package_store,
            config_store.clone(),
            Arc::new(UtcClock),
            config.countries.clone(),
        );

        info!(
            "Keypack SDK 初始化完成: version={} countries={:?}",
            SDK_VERSION, config.countries
        );

        Ok(Arc::new(Self {
            config,
            config_store,
            downloader,
        }))
    }

    /// 启动一轮天级密钥包同步
    pub async fn start_day_packages_download(&self) -> Result<()> {
        self.downloader.start_day_packages_download().await
    }

    /// 启动一轮小时级密钥包同步
    pub async fn start_hour_packages_download(&self) -> Result<()> {
        self.downloader.start_hour_packages_download().await
    }

    /// 当前下载状态快照
    pub async fn download_status(&self) -> DownloadStatus {
        self.downloader.current_status().await
    }

    /// 订阅下载状态变化
    pub fn subscribe_status(&self) -> tokio::sync::broadcast::Receiver<DownloadStatusEvent> {
        self.downloader.subscribe_status()
    }

    /// 最近一次成功下载的 UTC 毫秒时间戳
    pub async fn last_key_package_download_date(&self) -> Result<Option<i64>> {
        self.config_store.last_key_package_download_date().await
    }

    /// 配置的国家列表
    pub fn countries(&self) -> &[String] {
        &self.config.countries
    }

    /// 关闭 SDK，落盘所有未刷新的写入
    pub async fn shutdown(&self) -> Result<()> {
        self.config_store.flush().await?;
        info!("Keypack SDK 已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_builder_defaults() {
        let config = KeypackConfig::builder()
            .data_dir("/tmp/keypack")
            .base_url("https://cdn.example.com")
            .build();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/keypack"));
        assert_eq!(config.countries, vec![DEFAULT_COUNTRY.to_string()]);
        assert_eq!(config.connect_timeout_secs, Some(10));
        assert_eq!(config.request_timeout_secs, Some(30));
    }

    #[test]
    fn test_config_builder_countries() {
        let config = KeypackConfig::builder()
            .base_url("https://cdn.example.com")
            .country("DE")
            .country("FR")
            .build();
        assert_eq!(config.countries, vec!["DE".to_string(), "FR".to_string()]);
    }

    #[tokio::test]
    async fn test_initialize_requires_base_url() {
        let config = KeypackConfig::builder().data_dir("/tmp/unused").build();
        let err = KeypackSDK::initialize(config).await.unwrap_err();
        assert!(matches!(err, KeypackSDKError::Config(_)));
    }

    #[tokio::test]
    async fn test_initialize_and_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let config = KeypackConfig::builder()
            .data_dir(temp_dir.path())
            .base_url("https://cdn.example.com")
            .build();

        let sdk = KeypackSDK::initialize(config).await.unwrap();
        assert_eq!(sdk.download_status().await, DownloadStatus::Idle);
        assert_eq!(sdk.last_key_package_download_date().await.unwrap(), None);
        assert_eq!(sdk.countries(), &[DEFAULT_COUNTRY.to_string()]);
        sdk.shutdown().await.unwrap();
    }
}
