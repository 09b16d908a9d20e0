//! SQLite 存储模块 - 密钥包本地缓存
//!
//! 本模块提供：
//! - 天级 / 小时级密钥包表
//! - 批量写入的事务管理（一批整体成功或整体失败）
//! - WAL 模式和常规优化
//!
//! 错误按原样以 [`KeypackSDKError::SqliteError`] 上抛，
//! 由持久化适配层负责归类（磁盘满 / 一般写入失败）。

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{KeypackSDKError, Result};
use crate::package::PackageBlob;
use crate::storage::PackageStore;

/// SQLite 密钥包存储组件
#[derive(Debug)]
pub struct SqlitePackageStore {
    #[allow(dead_code)]
    base_path: PathBuf,
    /// 数据库连接（内部串行化所有访问）
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePackageStore {
    /// 在指定目录下创建（或打开）密钥包数据库
    pub async fn new(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        tokio::fs::create_dir_all(&base_path)
            .await
            .map_err(|e| KeypackSDKError::IO(format!("创建存储目录失败: {}", e)))?;

        let db_path = base_path.join("key_packages.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| KeypackSDKError::Database(format!("打开数据库失败: {}", e)))?;

        // 启用 WAL 模式和常规优化
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| KeypackSDKError::Database(format!("设置 WAL 模式失败: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| KeypackSDKError::Database(format!("设置同步模式失败: {}", e)))?;

        Self::create_tables(&conn)?;

        tracing::info!("密钥包数据库初始化完成: {}", db_path.display());

        Ok(Self {
            base_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS day_packages (
                country    TEXT NOT NULL,
                day_key    TEXT NOT NULL,
                payload    BLOB NOT NULL,
                etag       TEXT,
                sha256     TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                PRIMARY KEY (country, day_key)
            );
            CREATE TABLE IF NOT EXISTS hour_packages (
                country    TEXT NOT NULL,
                day_key    TEXT NOT NULL,
                hour       INTEGER NOT NULL,
                payload    BLOB NOT NULL,
                etag       TEXT,
                sha256     TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                PRIMARY KEY (country, day_key, hour)
            );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl PackageStore for SqlitePackageStore {
    async fn all_days(&self, country: &str) -> Result<HashSet<String>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT day_key FROM day_packages WHERE country = ?1")?;
        let rows = stmt.query_map(params![country], |row| row.get::<_, String>(0))?;

        let mut days = HashSet::new();
        for row in rows {
            days.insert(row?);
        }
        Ok(days)
    }

    async fn hours_for_day(&self, day_key: &str, country: &str) -> Result<HashSet<u32>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT hour FROM hour_packages WHERE country = ?1 AND day_key = ?2",
        )?;
        let rows = stmt.query_map(params![country, day_key], |row| row.get::<_, u32>(0))?;

        let mut hours = HashSet::new();
        for row in rows {
            hours.insert(row?);
        }
        Ok(hours)
    }

    async fn add_fetched_days(
        &self,
        packages: HashMap<String, PackageBlob>,
        country: &str,
    ) -> Result<()> {
        let fetched_at = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        for (day_key, blob) in &packages {
            tx.execute(
                "INSERT OR REPLACE INTO day_packages
                 (country, day_key, payload, etag, sha256, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    country,
                    day_key,
                    blob.data.as_ref(),
                    blob.etag,
                    blob.sha256,
                    fetched_at
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!("天级密钥包写入完成: country={} count={}", country, packages.len());
        Ok(())
    }

    async fn add_fetched_hours(
        &self,
        packages: HashMap<u32, PackageBlob>,
        day_key: &str,
        country: &str,
    ) -> Result<()> {
        let fetched_at = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        for (hour, blob) in &packages {
            tx.execute(
                "INSERT OR REPLACE INTO hour_packages
                 (country, day_key, hour, payload, etag, sha256, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    country,
                    day_key,
                    hour,
                    blob.data.as_ref(),
                    blob.etag,
                    blob.sha256,
                    fetched_at
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(
            "小时级密钥包写入完成: country={} day={} count={}",
            country,
            day_key,
            packages.len()
        );
        Ok(())
    }

    async fn delete_day_package(&self, day_key: &str, country: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        // 天级包被撤回时，其下的小时包一并失效
        tx.execute(
            "DELETE FROM day_packages WHERE country = ?1 AND day_key = ?2",
            params![country, day_key],
        )?;
        tx.execute(
            "DELETE FROM hour_packages WHERE country = ?1 AND day_key = ?2",
            params![country, day_key],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn delete_hour_package(&self, day_key: &str, hour: u32, country: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM hour_packages WHERE country = ?1 AND day_key = ?2 AND hour = ?3",
            params![country, day_key, hour],
        )?;
        Ok(())
    }
}
