// ==========================================
// 表格导入引擎 - 实体存储 SQLite 实现
// ==========================================
// 职责: 实现 EntityStore（使用 rusqlite）
// 约定: 目标表以 INTEGER PRIMARY KEY 列 "id" 作为实体标识
// 红线: Repository 不含业务规则,只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::{CellValue, EntityId, FieldValues};
use crate::repository::entity_store::{EntityStore, StoredEntity};
use crate::repository::error::{StoreError, StoreResult};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// 单条语句绑定参数上限（低于 SQLite 旧版默认的 999）
const MAX_BIND_PARAMS: usize = 900;

/// 实体主键列
const ID_COLUMN: &str = "id";

// ==========================================
// CellValue ↔ SQLite 值转换
// ==========================================

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Null => ToSqlOutput::Owned(Value::Null),
            CellValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            CellValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            CellValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            CellValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for CellValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(f) => CellValue::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                CellValue::Text(String::from_utf8_lossy(t).into_owned())
            }
        })
    }
}

/// 校验并引用标识符（表名/列名/保存点名）
///
/// 只接受 [A-Za-z_][A-Za-z0-9_]*,标识符来自配置文件,不能直接拼进 SQL
pub fn quote_ident(name: &str) -> StoreResult<String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ==========================================
// SqliteEntityStore
// ==========================================
pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    /// 创建新的 Store 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（与 ConfigManager 共享连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockError(format!("锁获取失败: {}", e)))
    }

    /// 执行查询并按 [id, fields...] 列序读取实体
    fn query_entities(
        conn: &Connection,
        sql: &str,
        params: &[&CellValue],
        fields: &[String],
    ) -> StoreResult<Vec<StoredEntity>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let id: EntityId = row.get(0)?;
            let mut values = FieldValues::new();
            for (idx, field) in fields.iter().enumerate() {
                values.insert(field.clone(), row.get::<_, CellValue>(idx + 1)?);
            }
            Ok(StoredEntity { id, values })
        })?;

        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?);
        }
        Ok(entities)
    }

    fn select_list(fields: &[String]) -> StoreResult<String> {
        let mut columns = vec![quote_ident(ID_COLUMN)?];
        for field in fields {
            columns.push(quote_ident(field)?);
        }
        Ok(columns.join(", "))
    }

    fn insert_sql(table: &str, record: &FieldValues) -> StoreResult<String> {
        let table = quote_ident(table)?;
        if record.is_empty() {
            return Ok(format!("INSERT INTO {} DEFAULT VALUES", table));
        }
        let columns = record
            .keys()
            .map(|k| quote_ident(k))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders(columns.len())
        ))
    }

    fn update_row(
        conn: &Connection,
        table: &str,
        id: EntityId,
        values: &[(&String, &CellValue)],
    ) -> StoreResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let assignments = values
            .iter()
            .map(|(field, _)| quote_ident(field).map(|f| format!("{} = ?", f)))
            .collect::<StoreResult<Vec<_>>>()?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(table)?,
            assignments.join(", "),
            quote_ident(ID_COLUMN)?
        );

        let id_value = CellValue::Integer(id);
        let mut params: Vec<&CellValue> = values.iter().map(|(_, v)| *v).collect();
        params.push(&id_value);

        let changed = conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(params.iter()))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                table: table.to_string(),
                id,
            });
        }
        Ok(())
    }
}

impl EntityStore for SqliteEntityStore {
    fn column_names(&self, table: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let sql = format!("PRAGMA table_info({})", quote_ident(table)?);
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        if names.is_empty() {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        Ok(names)
    }

    fn find_by_values(
        &self,
        table: &str,
        field: &str,
        values: &[CellValue],
    ) -> StoreResult<Vec<StoredEntity>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let fields = vec![field.to_string()];
        let select = Self::select_list(&fields)?;
        let table_q = quote_ident(table)?;
        let field_q = quote_ident(field)?;

        let mut entities = Vec::new();
        for slice in values.chunks(MAX_BIND_PARAMS) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                select,
                table_q,
                field_q,
                placeholders(slice.len())
            );
            let params: Vec<&CellValue> = slice.iter().collect();
            entities.extend(Self::query_entities(&conn, &sql, &params, &fields)?);
        }

        debug!(table, field, requested = values.len(), found = entities.len(), "查找预取完成");
        Ok(entities)
    }

    fn find_by_keys(
        &self,
        table: &str,
        fields: &[String],
        keys: &[Vec<CellValue>],
    ) -> StoreResult<Vec<StoredEntity>> {
        if fields.is_empty() || keys.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let select = Self::select_list(fields)?;
        let table_q = quote_ident(table)?;
        let clause = fields
            .iter()
            .map(|f| quote_ident(f).map(|q| format!("{} = ?", q)))
            .collect::<StoreResult<Vec<_>>>()?
            .join(" AND ");

        let keys_per_query = (MAX_BIND_PARAMS / fields.len()).max(1);
        let mut entities = Vec::new();
        for slice in keys.chunks(keys_per_query) {
            let where_clause = vec![format!("({})", clause); slice.len()].join(" OR ");
            let sql = format!("SELECT {} FROM {} WHERE {}", select, table_q, where_clause);
            let params: Vec<&CellValue> = slice.iter().flat_map(|key| key.iter()).collect();
            entities.extend(Self::query_entities(&conn, &sql, &params, fields)?);
        }

        debug!(table, keys = keys.len(), found = entities.len(), "唯一键预取完成");
        Ok(entities)
    }

    fn list_all(&self, table: &str, fields: &[String]) -> StoreResult<Vec<StoredEntity>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            Self::select_list(fields)?,
            quote_ident(table)?,
            quote_ident(ID_COLUMN)?
        );
        Self::query_entities(&conn, &sql, &[], fields)
    }

    fn insert_batch(&self, table: &str, records: &[FieldValues]) -> StoreResult<usize> {
        let conn = self.lock()?;
        let mut count = 0;
        for record in records {
            let sql = Self::insert_sql(table, record)?;
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.execute(params_from_iter(record.values()))?;
            count += 1;
        }
        Ok(count)
    }

    fn insert_one(&self, table: &str, record: &FieldValues) -> StoreResult<EntityId> {
        let conn = self.lock()?;
        let sql = Self::insert_sql(table, record)?;
        conn.prepare_cached(&sql)?
            .execute(params_from_iter(record.values()))?;
        Ok(conn.last_insert_rowid())
    }

    fn update_batch(
        &self,
        table: &str,
        updates: &[(EntityId, FieldValues)],
        fields: &[String],
    ) -> StoreResult<usize> {
        let conn = self.lock()?;
        let mut count = 0;
        for (id, record) in updates {
            let values: Vec<(&String, &CellValue)> = fields
                .iter()
                .filter_map(|f| record.get_key_value(f))
                .collect();
            Self::update_row(&conn, table, *id, &values)?;
            count += 1;
        }
        Ok(count)
    }

    fn update_one(&self, table: &str, id: EntityId, record: &FieldValues) -> StoreResult<()> {
        let conn = self.lock()?;
        let values: Vec<(&String, &CellValue)> = record.iter().collect();
        Self::update_row(&conn, table, id, &values)
    }

    fn delete_all(&self, table: &str) -> StoreResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(&format!("DELETE FROM {}", quote_ident(table)?), [])?;
        Ok(deleted)
    }

    fn savepoint(&self, name: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!("SAVEPOINT {}", quote_ident(name)?))
            .map_err(|e| StoreError::TransactionError(e.to_string()))
    }

    fn release_savepoint(&self, name: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!("RELEASE SAVEPOINT {}", quote_ident(name)?))
            .map_err(|e| StoreError::TransactionError(e.to_string()))
    }

    fn rollback_to_savepoint(&self, name: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)?))
            .map_err(|e| StoreError::TransactionError(e.to_string()))
    }
}
