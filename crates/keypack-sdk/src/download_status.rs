//! 下载状态管理
//!
//! 提供同步编排器的状态机与订阅机制：
//! - 状态机：`Idle → CheckingForNewPackages → Downloading → Idle`
//! - 每次状态变化同步广播一个事件
//! - 新的同步只允许从 `Idle` 启动（入口守卫，防止并发同步）

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::error::{KeypackSDKError, Result};

/// 下载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    /// 空闲
    Idle,
    /// 正在检查是否有新包
    CheckingForNewPackages,
    /// 正在下载
    Downloading,
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadStatus::Idle => write!(f, "Idle"),
            DownloadStatus::CheckingForNewPackages => write!(f, "CheckingForNewPackages"),
            DownloadStatus::Downloading => write!(f, "Downloading"),
        }
    }
}

/// 下载状态变化事件
#[derive(Debug, Clone)]
pub struct DownloadStatusEvent {
    pub old_status: DownloadStatus,
    pub new_status: DownloadStatus,
    /// UTC 毫秒时间戳
    pub timestamp: i64,
}

/// 下载状态管理器（线程安全）
///
/// 状态写入与入口守卫共用同一把写锁，多个国家任务可以并发调用
/// [`DownloadStatusManager::mark_downloading`] 而不会产生重复事件。
#[derive(Debug, Clone)]
pub struct DownloadStatusManager {
    status: Arc<RwLock<DownloadStatus>>,
    sender: broadcast::Sender<DownloadStatusEvent>,
}

impl Default for DownloadStatusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadStatusManager {
    /// 创建新的状态管理器（初始状态 `Idle`）
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            status: Arc::new(RwLock::new(DownloadStatus::Idle)),
            sender,
        }
    }

    /// 获取当前状态快照
    pub async fn current(&self) -> DownloadStatus {
        *self.status.read().await
    }

    /// 订阅状态变化事件
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadStatusEvent> {
        self.sender.subscribe()
    }

    /// 入口守卫：仅当状态为 `Idle` 时进入 `CheckingForNewPackages`
    ///
    /// 已有同步在执行时立即返回 [`KeypackSDKError::DownloadInProgress`]，
    /// 不改变任何状态。
    pub async fn begin_checking(&self) -> Result<()> {
        let mut status = self.status.write().await;
        if *status != DownloadStatus::Idle {
            return Err(KeypackSDKError::DownloadInProgress);
        }
        let old = *status;
        *status = DownloadStatus::CheckingForNewPackages;
        self.broadcast(old, *status);
        Ok(())
    }

    /// 进入 `Downloading`（幂等：已在下载中则不重复广播）
    ///
    /// 只在至少一个国家确实需要拉取时才会被调用。
    pub async fn mark_downloading(&self) {
        let mut status = self.status.write().await;
        if *status == DownloadStatus::Downloading {
            return;
        }
        let old = *status;
        *status = DownloadStatus::Downloading;
        self.broadcast(old, *status);
    }

    /// 结束本次同步，回到 `Idle`
    pub async fn finish(&self) {
        let mut status = self.status.write().await;
        if *status == DownloadStatus::Idle {
            return;
        }
        let old = *status;
        *status = DownloadStatus::Idle;
        self.broadcast(old, *status);
    }

    fn broadcast(&self, old_status: DownloadStatus, new_status: DownloadStatus) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.sender.send(DownloadStatusEvent {
            old_status,
            new_status,
            timestamp: Utc::now().timestamp_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_guard() {
        let manager = DownloadStatusManager::new();
        assert_eq!(manager.current().await, DownloadStatus::Idle);

        // 第一次进入成功
        manager.begin_checking().await.unwrap();
        assert_eq!(manager.current().await, DownloadStatus::CheckingForNewPackages);

        // 非 Idle 状态下再次进入被拒绝
        let err = manager.begin_checking().await.unwrap_err();
        assert!(matches!(err, KeypackSDKError::DownloadInProgress));

        manager.finish().await;
        assert_eq!(manager.current().await, DownloadStatus::Idle);
        manager.begin_checking().await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_downloading_is_idempotent() {
        let manager = DownloadStatusManager::new();
        let mut rx = manager.subscribe();

        manager.begin_checking().await.unwrap();
        manager.mark_downloading().await;
        manager.mark_downloading().await;
        manager.mark_downloading().await;
        manager.finish().await;

        // 只应观察到 3 次转换：进入检查、进入下载、回到空闲
        let e1 = rx.recv().await.unwrap();
        assert_eq!(e1.new_status, DownloadStatus::CheckingForNewPackages);
        let e2 = rx.recv().await.unwrap();
        assert_eq!(e2.old_status, DownloadStatus::CheckingForNewPackages);
        assert_eq!(e2.new_status, DownloadStatus::Downloading);
        let e3 = rx.recv().await.unwrap();
        assert_eq!(e3.new_status, DownloadStatus::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finish_without_transition_is_silent() {
        let manager = DownloadStatusManager::new();
        let mut rx = manager.subscribe();

        manager.finish().await;
        assert!(rx.try_recv().is_err());
    }
}
