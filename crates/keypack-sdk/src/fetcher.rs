//! 密钥包拉取模块
//!
//! 本模块提供：
//! - [`PackageFetcher`]：「可用桶列表」+「批量拉取」两个线上能力的抽象
//! - [`HttpPackageFetcher`]：基于 reqwest 的 CDN 分发实现
//! - [`RestrictedPackageFetcher`]：受网络策略限制的变体（仅用于小时级）
//!
//! 重试/超时属于底层 HTTP 客户端的职责，本层不做额外重试。

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{KeypackSDKError, Result};
use crate::network::{NetworkStatus, NetworkStatusListener};
use crate::package::{Granularity, PackageBlob};

/// 密钥包拉取能力
///
/// 批量拉取是整体成功或整体失败的：任何一个桶失败都视为本批次失败。
#[async_trait]
pub trait PackageFetcher: Send + Sync + std::fmt::Debug {
    /// 列出服务器上某国家、某粒度下可用的桶键
    async fn list_available(
        &self,
        country: &str,
        granularity: &Granularity,
    ) -> Result<HashSet<String>>;

    /// 批量拉取指定桶键对应的密钥包
    async fn fetch_batch(
        &self,
        country: &str,
        granularity: &Granularity,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, PackageBlob>>;
}

/// HTTP 拉取客户端配置
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// CDN 分发服务的基础 URL（不带末尾斜杠）
    pub base_url: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 基于 reqwest 的密钥包拉取客户端
///
/// 路由约定（CDN 分发服务）：
/// - 天级列表：`GET {base}/version/v1/diagnosis-keys/country/{country}/date`
/// - 天级单包：`GET .../date/{day}`
/// - 小时列表：`GET .../date/{day}/hour`
/// - 小时单包：`GET .../date/{day}/hour/{hour}`
#[derive(Debug, Clone)]
pub struct HttpPackageFetcher {
    client: Client,
    base_url: String,
}

impl HttpPackageFetcher {
    /// 创建新的 HTTP 拉取客户端
    pub fn new(config: &HttpFetcherConfig) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| KeypackSDKError::Transport(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn country_url(&self, country: &str) -> String {
        format!("{}/version/v1/diagnosis-keys/country/{}", self.base_url, country)
    }

    fn list_url(&self, country: &str, granularity: &Granularity) -> String {
        match granularity {
            Granularity::Daily => format!("{}/date", self.country_url(country)),
            Granularity::Hourly { day_key } => {
                format!("{}/date/{}/hour", self.country_url(country), day_key)
            }
        }
    }

    fn package_url(&self, country: &str, granularity: &Granularity, key: &str) -> String {
        match granularity {
            Granularity::Daily => format!("{}/date/{}", self.country_url(country), key),
            Granularity::Hourly { day_key } => {
                format!("{}/date/{}/hour/{}", self.country_url(country), day_key, key)
            }
        }
    }

    async fn download_package(&self, url: &str) -> Result<PackageBlob> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KeypackSDKError::Transport(format!("请求密钥包失败: {}", e)))?
            .error_for_status()
            .map_err(|e| KeypackSDKError::Transport(format!("密钥包响应异常: {}", e)))?;

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let data = response
            .bytes()
            .await
            .map_err(|e| KeypackSDKError::Transport(format!("读取密钥包内容失败: {}", e)))?;

        Ok(PackageBlob::new(data, etag))
    }
}

#[async_trait]
impl PackageFetcher for HttpPackageFetcher {
    async fn list_available(
        &self,
        country: &str,
        granularity: &Granularity,
    ) -> Result<HashSet<String>> {
        let url = self.list_url(country, granularity);
        debug!("请求可用桶列表: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| KeypackSDKError::Transport(format!("请求可用桶列表失败: {}", e)))?
            .error_for_status()
            .map_err(|e| KeypackSDKError::Transport(format!("可用桶列表响应异常: {}", e)))?;

        // 天级列表是日期字符串数组，小时列表是整数数组
        let keys = match granularity {
            Granularity::Daily => {
                let days: Vec<String> = response
                    .json()
                    .await
                    .map_err(|e| KeypackSDKError::InvalidData(format!("解析天级列表失败: {}", e)))?;
                days.into_iter().collect()
            }
            Granularity::Hourly { .. } => {
                let hours: Vec<u32> = response
                    .json()
                    .await
                    .map_err(|e| KeypackSDKError::InvalidData(format!("解析小时列表失败: {}", e)))?;
                hours.into_iter().map(|h| h.to_string()).collect()
            }
        };

        Ok(keys)
    }

    async fn fetch_batch(
        &self,
        country: &str,
        granularity: &Granularity,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, PackageBlob>> {
        let mut packages = HashMap::with_capacity(keys.len());

        // 批次整体成功或整体失败：任何一个桶失败即中止
        for key in keys {
            let url = self.package_url(country, granularity, key);
            let blob = self.download_package(&url).await?;
            debug!("密钥包下载完成: {} ({} 字节)", url, blob.data.len());
            packages.insert(key.clone(), blob);
        }

        Ok(packages)
    }
}

/// 受网络策略限制的拉取变体
///
/// 仅当网络为不计费网络时才放行，用于小时级密钥包。
#[derive(Debug)]
pub struct RestrictedPackageFetcher {
    inner: Arc<dyn PackageFetcher>,
    listener: Arc<dyn NetworkStatusListener>,
}

impl RestrictedPackageFetcher {
    /// 包装任意拉取实现，加上网络策略检查
    pub fn new(inner: Arc<dyn PackageFetcher>, listener: Arc<dyn NetworkStatusListener>) -> Self {
        Self { inner, listener }
    }

    async fn check_policy(&self) -> Result<()> {
        let status = self.listener.current_status().await;
        if status != NetworkStatus::Online {
            warn!("网络策略不允许拉取小时级密钥包: {}", status);
            return Err(KeypackSDKError::Transport(format!(
                "network policy forbids hourly fetch: {}",
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PackageFetcher for RestrictedPackageFetcher {
    async fn list_available(
        &self,
        country: &str,
        granularity: &Granularity,
    ) -> Result<HashSet<String>> {
        self.check_policy().await?;
        self.inner.list_available(country, granularity).await
    }

    async fn fetch_batch(
        &self,
        country: &str,
        granularity: &Granularity,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, PackageBlob>> {
        self.check_policy().await?;
        self.inner.fetch_batch(country, granularity, keys).await
    }
}
