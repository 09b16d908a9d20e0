//! 包数据实体定义
//!
//! 本模块提供：
//! - 同步粒度（天级 / 小时级）
//! - 拉取到的密钥包载荷（二进制内容 + 完整性元数据）

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// 默认的国家配置（整个大区的聚合包）
pub const DEFAULT_COUNTRY: &str = "EUR";

/// 同步粒度
///
/// 决定使用哪一族 列表/拉取/持久化/清理 操作，以及桶键的编码方式：
/// - 天级：桶键为日期字符串（`YYYY-MM-DD`）
/// - 小时级：桶键为 0-23 的小时字符串，限定在某一天之内
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Granularity {
    /// 天级密钥包
    Daily,
    /// 小时级密钥包（限定在指定的 UTC 日内）
    Hourly {
        /// 所属 UTC 日键
        day_key: String,
    },
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Hourly { day_key } => write!(f, "hourly({})", day_key),
        }
    }
}

/// 拉取到的密钥包载荷
///
/// 内容对 SDK 不透明，只携带完整性元数据（ETag + SHA-256）随包持久化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBlob {
    /// 二进制内容
    pub data: Bytes,
    /// 服务器返回的 ETag（可选）
    pub etag: Option<String>,
    /// 内容的 SHA-256 摘要（hex 编码，拉取时计算）
    pub sha256: String,
}

impl PackageBlob {
    /// 创建新的包载荷，摘要在此时计算
    pub fn new(data: Bytes, etag: Option<String>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&data));
        Self { data, etag, sha256 }
    }
}
