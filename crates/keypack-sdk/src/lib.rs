//! Keypack SDK - 基于 delta 的密钥包同步引擎
//!
//! 与中心服务器按「桶」对账本地的密钥包缓存：
//! - 📦 服务器按国家发布天级 / 小时级密钥包，SDK 只拉取本地缺失的桶
//! - 🧮 集合差对账：服务器已撤回的桶被及时清理，已有的桶不会重复拉取
//! - 🌍 多国家并发同步，按配置顺序上报第一个错误
//! - 🗄️ SQLite 包缓存 + sled 同步标志，存储故障分类上抛
//! - 📶 小时级包只在不计费网络下拉取（平台层注入网络策略）
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use keypack_sdk::{KeypackSDK, KeypackConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = KeypackConfig::builder()
//!         .data_dir("/path/to/data")
//!         .base_url("https://cdn.example.com")
//!         .country("EUR")
//!         .build();
//!
//!     let sdk = KeypackSDK::initialize(config).await?;
//!
//!     // 天级同步：确定缺失的桶、拉取并落盘
//!     sdk.start_day_packages_download().await?;
//!
//!     // 小时级同步（仅不计费网络）
//!     sdk.start_hour_packages_download().await?;
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod download_status;
pub mod error;
pub mod fetcher;
pub mod network;
pub mod package;
pub mod persistence;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod time_keys;
pub mod version;

// 重新导出核心类型，方便使用
pub use download_status::{DownloadStatus, DownloadStatusEvent, DownloadStatusManager};
pub use error::{KeypackSDKError, Result};
pub use fetcher::{
    HttpFetcherConfig, HttpPackageFetcher, PackageFetcher, RestrictedPackageFetcher,
};
pub use network::{AlwaysUnrestricted, NetworkStatus, NetworkStatusListener};
pub use package::{Granularity, PackageBlob, DEFAULT_COUNTRY};
pub use persistence::PersistenceAdapter;
pub use sdk::{KeypackConfig, KeypackConfigBuilder, KeypackSDK};
pub use storage::{ConfigStore, PackageStore, SledConfigStore, SqlitePackageStore};
pub use sync::delta::{local_delta, server_delta};
pub use sync::KeyPackageDownloader;
pub use time_keys::{TimeKeyProvider, UtcClock, DAY_KEY_FORMAT};
pub use version::SDK_VERSION;
