//! 密钥包同步编排器
//!
//! 职责：
//! - 持有状态机与入口守卫（同一时刻最多一轮同步）
//! - 每次调用对所有配置的国家并发执行一轮对账
//! - 按配置顺序取第一个国家错误作为整轮结果（结果可复现）
//! - 在一轮结束时写入该粒度的成功标志（唯一写入方）
//!
//! 单个国家的流程：判断是否需要同步 → 列出服务器可用桶 →
//! 清理本地多余的桶（尽力而为）→ 拉取缺失的桶 → 持久化。

use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::download_status::{DownloadStatus, DownloadStatusEvent, DownloadStatusManager};
use crate::error::{KeypackSDKError, Result};
use crate::fetcher::PackageFetcher;
use crate::package::{Granularity, DEFAULT_COUNTRY};
use crate::persistence::PersistenceAdapter;
use crate::storage::{ConfigStore, PackageStore};
use crate::sync::delta;
use crate::time_keys::TimeKeyProvider;

/// 密钥包同步编排器
///
/// 中途不支持取消：入口守卫直接拒绝重叠的同步请求，
/// 而不是排队或合并。超时/重试由底层拉取能力负责。
#[derive(Debug, Clone)]
pub struct KeyPackageDownloader {
    /// 默认网络的拉取能力（天级）
    fetcher: Arc<dyn PackageFetcher>,
    /// 受网络策略限制的拉取能力（仅小时级使用）
    restricted_fetcher: Arc<dyn PackageFetcher>,
    persistence: PersistenceAdapter,
    store: Arc<dyn PackageStore>,
    config: Arc<dyn ConfigStore>,
    clock: Arc<dyn TimeKeyProvider>,
    /// 配置的国家列表（固定顺序，决定错误上报的优先级）
    countries: Vec<String>,
    status: DownloadStatusManager,
}

impl KeyPackageDownloader {
    /// 创建同步编排器
    ///
    /// `countries` 为空时使用默认的大区聚合配置。
    pub fn new(
        fetcher: Arc<dyn PackageFetcher>,
        restricted_fetcher: Arc<dyn PackageFetcher>,
        store: Arc<dyn PackageStore>,
        config: Arc<dyn ConfigStore>,
        clock: Arc<dyn TimeKeyProvider>,
        countries: Vec<String>,
    ) -> Self {
        let countries = if countries.is_empty() {
            vec![DEFAULT_COUNTRY.to_string()]
        } else {
            countries
        };

        Self {
            fetcher,
            restricted_fetcher,
            persistence: PersistenceAdapter::new(store.clone(), config.clone()),
            store,
            config,
            clock,
            countries,
            status: DownloadStatusManager::new(),
        }
    }

    /// 获取当前下载状态快照
    pub async fn current_status(&self) -> DownloadStatus {
        self.status.current().await
    }

    /// 订阅下载状态变化
    pub fn subscribe_status(&self) -> tokio::sync::broadcast::Receiver<DownloadStatusEvent> {
        self.status.subscribe()
    }

    /// 启动一轮天级密钥包同步
    ///
    /// 已有同步在执行时立即失败（[`KeypackSDKError::DownloadInProgress`]），
    /// 不改变任何标志、不产生网络请求。否则对所有国家并发对账，
    /// 回到 `Idle` 后恰好返回一次整轮结果。
    pub async fn start_day_packages_download(&self) -> Result<()> {
        self.status.begin_checking().await?;
        info!("开始天级密钥包同步: countries={:?}", self.countries);

        let result = self.run_pass(&Granularity::Daily).await;
        self.status.finish().await;

        if let Err(e) = self
            .config
            .set_was_recent_day_key_download_successful(result.is_ok())
            .await
        {
            warn!("写入天级同步标志失败: {}", e);
        }

        match &result {
            Ok(()) => info!("天级密钥包同步完成"),
            Err(e) => warn!("天级密钥包同步失败: {}", e),
        }
        result
    }

    /// 启动一轮小时级密钥包同步（限定在当前 UTC 日内）
    ///
    /// 小时级只走受网络策略限制的拉取能力。守卫语义与天级相同。
    pub async fn start_hour_packages_download(&self) -> Result<()> {
        self.status.begin_checking().await?;
        let granularity = Granularity::Hourly {
            day_key: self.clock.current_day_key(),
        };
        info!("开始小时级密钥包同步: {} countries={:?}", granularity, self.countries);

        let result = self.run_pass(&granularity).await;
        self.status.finish().await;

        if let Err(e) = self
            .config
            .set_was_recent_hour_key_download_successful(result.is_ok())
            .await
        {
            warn!("写入小时级同步标志失败: {}", e);
        }

        match &result {
            Ok(()) => info!("小时级密钥包同步完成"),
            Err(e) => warn!("小时级密钥包同步失败: {}", e),
        }
        result
    }

    /// 对所有国家并发执行一轮对账并汇总结果
    ///
    /// 等待所有国家任务结束后才返回（一个国家失败不会取消其他
    /// 国家正在进行的工作），按配置顺序取第一个错误。
    async fn run_pass(&self, granularity: &Granularity) -> Result<()> {
        let mut tasks = JoinSet::new();
        for (index, country) in self.countries.iter().enumerate() {
            let this = self.clone();
            let country = country.clone();
            let granularity = granularity.clone();
            tasks.spawn(async move { (index, this.sync_country(&country, &granularity).await) });
        }

        let mut outcomes: Vec<Option<Result<()>>> =
            (0..self.countries.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => {
                    // 任务 panic 属于代码缺陷，对应国家按未完成处理
                    error!("国家同步任务异常终止: {}", e);
                }
            }
        }

        let mut first_error: Option<KeypackSDKError> = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let country = &self.countries[index];
            match outcome {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    warn!("国家同步失败: country={} error={}", country, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                None => {
                    if first_error.is_none() {
                        first_error =
                            Some(KeypackSDKError::UncompletedPackages(country.clone()));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 单个国家的一轮对账
    async fn sync_country(&self, country: &str, granularity: &Granularity) -> Result<()> {
        if !self.is_sync_warranted(country, granularity).await {
            debug!("无需同步: country={} granularity={}", country, granularity);
            return Ok(());
        }

        self.status.mark_downloading().await;

        let fetcher = self.fetcher_for(granularity);
        let server_keys = match fetcher.list_available(country, granularity).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("获取可用桶列表失败: country={} error={}", country, e);
                return Err(KeypackSDKError::UncompletedPackages(country.to_string()));
            }
        };

        let local_keys = self.local_keys(country, granularity).await?;

        // 先清理：服务器已撤回的桶不应在本轮结束后继续存在
        let obsolete = delta::local_delta(&local_keys, &server_keys);
        if !obsolete.is_empty() {
            self.persistence.prune(&obsolete, granularity, country).await;
        }

        let missing = delta::server_delta(&local_keys, &server_keys);
        if missing.is_empty() {
            debug!("没有新的密钥包: country={} granularity={}", country, granularity);
            return Ok(());
        }

        info!(
            "发现 {} 个缺失的密钥包: country={} granularity={}",
            missing.len(),
            country,
            granularity
        );

        let packages = match fetcher.fetch_batch(country, granularity, &missing).await {
            Ok(packages) => packages,
            Err(e) => {
                warn!("批量拉取密钥包失败: country={} error={}", country, e);
                return Err(KeypackSDKError::UncompletedPackages(country.to_string()));
            }
        };

        // 批量拉取整体成功或整体失败，缺桶即视为本国家未完成
        if packages.len() != missing.len() {
            warn!(
                "批量拉取不完整: country={} expected={} got={}",
                country,
                missing.len(),
                packages.len()
            );
            return Err(KeypackSDKError::UncompletedPackages(country.to_string()));
        }

        self.persistence.persist(packages, granularity, country).await?;
        Ok(())
    }

    /// 判断某国家是否需要同步
    ///
    /// 天级：昨天的桶尚未入库，或上一轮天级同步未整体成功。
    /// 小时级：一小时前的桶尚未入库，或上一轮小时级同步未整体成功。
    /// 本地读取失败时按需要同步处理（宁可多跑一轮）。
    async fn is_sync_warranted(&self, country: &str, granularity: &Granularity) -> bool {
        match granularity {
            Granularity::Daily => {
                let last_successful = self
                    .config
                    .was_recent_day_key_download_successful()
                    .await
                    .unwrap_or(false);
                let yesterday = self.clock.previous_day_key();
                let has_yesterday = match self.store.all_days(country).await {
                    Ok(days) => days.contains(&yesterday),
                    Err(e) => {
                        warn!("读取本地天级列表失败，按需要同步处理: {}", e);
                        false
                    }
                };
                !has_yesterday || !last_successful
            }
            Granularity::Hourly { .. } => {
                let last_successful = self
                    .config
                    .was_recent_hour_key_download_successful()
                    .await
                    .unwrap_or(false);
                let (day_key, hour) = self.clock.previous_hour();
                let has_previous_hour = match self.store.hours_for_day(&day_key, country).await {
                    Ok(hours) => hours.contains(&hour),
                    Err(e) => {
                        warn!("读取本地小时列表失败，按需要同步处理: {}", e);
                        false
                    }
                };
                !has_previous_hour || !last_successful
            }
        }
    }

    /// 本地已存储的桶键集合（小时键转为字符串参与 delta 计算）
    async fn local_keys(&self, country: &str, granularity: &Granularity) -> Result<HashSet<String>> {
        let result = match granularity {
            Granularity::Daily => self.store.all_days(country).await,
            Granularity::Hourly { day_key } => self
                .store
                .hours_for_day(day_key, country)
                .await
                .map(|hours| hours.into_iter().map(|h| h.to_string()).collect()),
        };

        result.map_err(|e| {
            warn!("读取本地桶列表失败: country={} error={}", country, e);
            KeypackSDKError::UnableToWriteDiagnosisKeys
        })
    }

    fn fetcher_for(&self, granularity: &Granularity) -> Arc<dyn PackageFetcher> {
        match granularity {
            Granularity::Daily => self.fetcher.clone(),
            Granularity::Hourly { .. } => self.restricted_fetcher.clone(),
        }
    }
}
