//! 网络策略模块
//!
//! 小时级密钥包只允许在不计费网络（如 Wi-Fi）下拉取。
//! 网络状态由平台层（Android/iOS/桌面）通过 trait 注入。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线（不计费网络）
    Online,
    /// 离线
    Offline,
    /// 计费网络（如蜂窝数据）
    Metered,
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Online => write!(f, "Online"),
            NetworkStatus::Offline => write!(f, "Offline"),
            NetworkStatus::Metered => write!(f, "Metered"),
        }
    }
}

/// 网络状态监听器 trait（由平台层实现）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn current_status(&self) -> NetworkStatus;
}

/// 永远视为不计费网络的监听器（默认实现，也用于测试）
#[derive(Debug, Default, Clone)]
pub struct AlwaysUnrestricted;

#[async_trait]
impl NetworkStatusListener for AlwaysUnrestricted {
    async fn current_status(&self) -> NetworkStatus {
        NetworkStatus::Online
    }
}
