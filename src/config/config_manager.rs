// ==========================================
// 表格导入引擎 - 配置管理器
// ==========================================
// 职责: 运行参数加载、查询、写入
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_settings_trait::{
    ImportSettingsReader, DEFAULT_BATCH_SIZE, DEFAULT_FAILED_ROWS_DISPLAY_LIMIT,
};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// 配置键
pub mod config_keys {
    pub const BATCH_SIZE: &str = "import/batch_size";
    pub const FAILED_ROWS_DISPLAY_LIMIT: &str = "import/failed_rows_display_limit";
    pub const DEFAULT_CHUNK_SIZE: &str = "import/default_chunk_size";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.ensure_schema()?;
        Ok(manager)
    }

    /// 从已有连接创建 ConfigManager（与实体存储共享连接）
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        let manager = Self { conn };
        manager.ensure_schema()?;
        Ok(manager)
    }

    /// 建立 config_kv 表（已存在则跳过）
    fn ensure_schema(&self) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config_kv (
                scope_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (scope_id, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取全部 global 配置的快照
    pub fn get_config_snapshot(&self) -> Result<BTreeMap<String, String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    /// 读取正整数配置,缺失或格式错误时返回默认值
    fn get_positive_or_default(&self, key: &str, default: usize) -> Result<usize, Box<dyn Error>> {
        Ok(self.get_positive(key)?.unwrap_or(default))
    }

    fn get_positive(&self, key: &str) -> Result<Option<usize>, Box<dyn Error>> {
        let value = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(None),
        };
        match value.trim().parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %value,
                    "配置值不是正整数，使用默认值"
                );
                Ok(None)
            }
        }
    }
}

// ==========================================
// ImportSettingsReader Trait 实现
// ==========================================
impl ImportSettingsReader for ConfigManager {
    fn get_batch_size(&self) -> Result<usize, Box<dyn Error>> {
        self.get_positive_or_default(config_keys::BATCH_SIZE, DEFAULT_BATCH_SIZE)
    }

    fn get_failed_rows_display_limit(&self) -> Result<usize, Box<dyn Error>> {
        self.get_positive_or_default(
            config_keys::FAILED_ROWS_DISPLAY_LIMIT,
            DEFAULT_FAILED_ROWS_DISPLAY_LIMIT,
        )
    }

    fn get_default_chunk_size(&self) -> Result<Option<usize>, Box<dyn Error>> {
        self.get_positive(config_keys::DEFAULT_CHUNK_SIZE)
    }
}
