use std::fmt;
use rusqlite;

#[derive(Debug)]
pub enum KeypackSDKError {
    /// 当前已有一次同步在执行中（状态守卫，调用方稍后重试）
    DownloadInProgress,
    /// 至少一个国家的列表/拉取未完成（瞬时网络故障，可整体重试）
    UncompletedPackages(String),
    /// 存储介质已满（用户可自行处理，不自动重试）
    NoDiskSpace,
    /// 诊断密钥包写入失败（磁盘满以外的所有存储故障）
    UnableToWriteDiagnosisKeys,
    // 环境类错误
    SqliteError(rusqlite::Error),
    Database(String),
    KvStore(String),
    Serialization(String),
    IO(String),
    Transport(String),
    InvalidData(String),
    Config(String),
}

impl fmt::Display for KeypackSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeypackSDKError::DownloadInProgress => write!(f, "Key package download already in progress"),
            KeypackSDKError::UncompletedPackages(country) => {
                write!(f, "Uncompleted key packages for country: {}", country)
            }
            KeypackSDKError::NoDiskSpace => write!(f, "No disk space left for key packages"),
            KeypackSDKError::UnableToWriteDiagnosisKeys => write!(f, "Unable to write diagnosis keys"),
            KeypackSDKError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            KeypackSDKError::Database(e) => write!(f, "Database error: {}", e),
            KeypackSDKError::KvStore(e) => write!(f, "KV store error: {}", e),
            KeypackSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            KeypackSDKError::IO(e) => write!(f, "IO error: {}", e),
            KeypackSDKError::Transport(e) => write!(f, "Transport error: {}", e),
            KeypackSDKError::InvalidData(e) => write!(f, "Invalid data: {}", e),
            KeypackSDKError::Config(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for KeypackSDKError {}

impl From<rusqlite::Error> for KeypackSDKError {
    fn from(error: rusqlite::Error) -> Self {
        KeypackSDKError::SqliteError(error)
    }
}

impl From<serde_json::Error> for KeypackSDKError {
    fn from(error: serde_json::Error) -> Self {
        KeypackSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for KeypackSDKError {
    fn from(error: std::io::Error) -> Self {
        KeypackSDKError::IO(error.to_string())
    }
}

impl KeypackSDKError {
    /// 判断是否可以整体重试（瞬时网络类错误）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeypackSDKError::UncompletedPackages(_) | KeypackSDKError::Transport(_)
        )
    }

    /// 判断是否是用户可处理的本地环境错误（如磁盘已满）
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, KeypackSDKError::NoDiskSpace)
    }
}

pub type Result<T> = std::result::Result<T, KeypackSDKError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            KeypackSDKError::DownloadInProgress.to_string(),
            "Key package download already in progress"
        );
        assert_eq!(
            KeypackSDKError::UncompletedPackages("EUR".to_string()).to_string(),
            "Uncompleted key packages for country: EUR"
        );
        assert_eq!(
            KeypackSDKError::NoDiskSpace.to_string(),
            "No disk space left for key packages"
        );
    }

    #[test]
    fn test_error_classification_helpers() {
        assert!(KeypackSDKError::UncompletedPackages("EUR".to_string()).is_retryable());
        assert!(!KeypackSDKError::NoDiskSpace.is_retryable());
        assert!(KeypackSDKError::NoDiskSpace.is_user_actionable());
        assert!(!KeypackSDKError::UnableToWriteDiagnosisKeys.is_user_actionable());
    }
}
