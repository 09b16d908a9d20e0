//! 时间键提供者
//!
//! # 设计原则
//!
//! - **全部使用 UTC**：日键与小时键一律按 UTC 计算，与设备时区无关
//! - **日键格式**：`YYYY-MM-DD` 字符串（服务器目录的日期编码）
//! - **小时键**：0-23 的整数；参与 delta 计算时转为字符串

use chrono::{Duration, Timelike, Utc};

/// 日键格式（UTC）
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// 时间键提供者 trait（生产环境用 [`UtcClock`]，测试可注入固定时钟）
pub trait TimeKeyProvider: Send + Sync + std::fmt::Debug {
    /// 当前 UTC 日键
    fn current_day_key(&self) -> String;

    /// 昨天的 UTC 日键
    fn previous_day_key(&self) -> String;

    /// 当前 UTC 小时键（0-23）
    fn current_hour_key(&self) -> u32;

    /// 一小时前的 (UTC 日键, 小时键)
    ///
    /// 跨午夜时返回昨天的日键 + 23。
    fn previous_hour(&self) -> (String, u32);
}

/// 基于系统时钟的 UTC 时间键提供者
#[derive(Debug, Default, Clone)]
pub struct UtcClock;

impl TimeKeyProvider for UtcClock {
    fn current_day_key(&self) -> String {
        Utc::now().format(DAY_KEY_FORMAT).to_string()
    }

    fn previous_day_key(&self) -> String {
        (Utc::now() - Duration::days(1)).format(DAY_KEY_FORMAT).to_string()
    }

    fn current_hour_key(&self) -> u32 {
        Utc::now().hour()
    }

    fn previous_hour(&self) -> (String, u32) {
        let prev = Utc::now() - Duration::hours(1);
        (prev.format(DAY_KEY_FORMAT).to_string(), prev.hour())
    }
}
