//! 密钥包同步模块
//!
//! 职责：
//! - 计算服务器可用集与本地已存集的差（delta）
//! - 按国家并发执行一轮对账：列表 → 清理 → 拉取 → 持久化
//! - 汇总各国家结果并维护按粒度的成功标志

pub mod delta;
pub mod downloader;

pub use downloader::KeyPackageDownloader;
