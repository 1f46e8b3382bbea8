// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、测试数据生成等功能
// ==========================================

#![allow(dead_code)]

use rusqlite::Connection;
use std::error::Error;
use table_import::db::open_sqlite_connection;
use table_import::{parse_config, RawImportConfig, SqliteEntityStore};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;

    // 初始化 schema
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 初始化数据库 schema
fn init_schema(conn: &Connection) -> Result<(), Box<dyn Error>> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS country (
            id INTEGER PRIMARY KEY,
            name TEXT,
            code TEXT UNIQUE
        );

        CREATE TABLE IF NOT EXISTS city (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            country_id INTEGER NOT NULL REFERENCES country(id)
        );

        CREATE TABLE IF NOT EXISTS person (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT
        );
        "#,
    )?;
    Ok(())
}

/// 打开实体存储
pub fn open_store(db_path: &str) -> SqliteEntityStore {
    SqliteEntityStore::new(db_path).expect("Failed to open SqliteEntityStore")
}

/// 插入国家测试数据
pub fn insert_country(db_path: &str, name: &str, code: &str) -> Result<i64, Box<dyn Error>> {
    let conn = open_sqlite_connection(db_path)?;
    conn.execute(
        "INSERT INTO country (name, code) VALUES (?1, ?2)",
        rusqlite::params![name, code],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 统计表行数
pub fn count_rows(db_path: &str, table: &str) -> i64 {
    let conn = open_sqlite_connection(db_path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .unwrap()
}

/// 读取国家 (name, code) 列表（按 id）
pub fn list_countries(db_path: &str) -> Vec<(Option<String>, Option<String>)> {
    let conn = open_sqlite_connection(db_path).unwrap();
    let mut stmt = conn
        .prepare("SELECT name, code FROM country ORDER BY id")
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap();
    rows.map(|r| r.unwrap()).collect()
}

/// 国家 + 城市两步配置（同一文件混合两类行）
pub fn country_city_config(create_if_missing: bool) -> RawImportConfig {
    let json = format!(
        r#"{{
            "file_format": "csv",
            "order": ["country", "city"],
            "models": {{
                "country": {{
                    "model": "country",
                    "unique_by": ["code"],
                    "required_fields": ["name", "code"],
                    "only_if_present": ["code"],
                    "direct_columns": {{"name": "name", "code": "code"}}
                }},
                "city": {{
                    "model": "city",
                    "required_fields": ["name", "country_id"],
                    "only_if_present": ["country_code"],
                    "direct_columns": {{"name": "name"}},
                    "lookup_fields": {{
                        "country_id": {{
                            "column": "country_code",
                            "model": "country",
                            "lookup_field": "code",
                            "create_if_missing": {}
                        }}
                    }}
                }}
            }}
        }}"#,
        create_if_missing
    );
    parse_config(&json).unwrap()
}

/// 单步国家配置
pub fn country_config(update_if_exists: bool) -> RawImportConfig {
    let json = format!(
        r#"{{
            "file_format": "csv",
            "order": ["country"],
            "models": {{
                "country": {{
                    "model": "country",
                    "unique_by": ["code"],
                    "update_if_exists": {},
                    "required_fields": ["name"],
                    "direct_columns": ["name", "code"]
                }}
            }}
        }}"#,
        update_if_exists
    );
    parse_config(&json).unwrap()
}

/// 单步人员配置
pub fn person_config() -> RawImportConfig {
    parse_config(
        r#"{
            "file_format": "csv",
            "order": ["person"],
            "models": {
                "person": {
                    "model": "person",
                    "unique_by": ["email"],
                    "required_fields": ["email"],
                    "direct_columns": {"email": "email", "name": "name"}
                }
            }
        }"#,
    )
    .unwrap()
}
