// ==========================================
// 表格导入引擎 - 实体存储 Trait
// ==========================================
// 职责: 定义导入管道所需的存储接口（不包含实现）
// 红线: Repository 不含业务规则,只做数据 CRUD 与事务边界
// ==========================================

use crate::domain::types::{CellValue, EntityId, FieldValues};
use crate::repository::error::StoreResult;

/// 已持久化实体（只携带查询到的字段）
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub id: EntityId,
    pub values: FieldValues,
}

// ==========================================
// EntityStore Trait
// ==========================================
// 用途: 导入管道的关系型存储抽象
// 实现者: SqliteEntityStore（使用 rusqlite）
pub trait EntityStore {
    // ===== 结构信息 =====

    /// 读取表的列名
    ///
    /// # 返回
    /// - Ok(Vec<String>): 列名列表
    /// - Err(TableNotFound): 表不存在
    fn column_names(&self, table: &str) -> StoreResult<Vec<String>>;

    // ===== 查询 =====

    /// 按单字段取值集合查询（查找预取）
    ///
    /// # 参数
    /// - table: 目标表
    /// - field: 查找字段
    /// - values: 需要解析的取值（调用方已去重）
    ///
    /// # 返回
    /// - 命中实体,values 中只含 field
    fn find_by_values(
        &self,
        table: &str,
        field: &str,
        values: &[CellValue],
    ) -> StoreResult<Vec<StoredEntity>>;

    /// 按字段元组集合查询（唯一键预取）
    ///
    /// # 参数
    /// - fields: 唯一键字段
    /// - keys: 每个元素与 fields 等长
    fn find_by_keys(
        &self,
        table: &str,
        fields: &[String],
        keys: &[Vec<CellValue>],
    ) -> StoreResult<Vec<StoredEntity>>;

    /// 读取全表（导出用）
    fn list_all(&self, table: &str, fields: &[String]) -> StoreResult<Vec<StoredEntity>>;

    // ===== 写入 =====

    /// 批量插入（不回传 id）
    fn insert_batch(&self, table: &str, records: &[FieldValues]) -> StoreResult<usize>;

    /// 单条插入
    ///
    /// # 返回
    /// - 新实体 id
    fn insert_one(&self, table: &str, record: &FieldValues) -> StoreResult<EntityId>;

    /// 批量更新（只写 fields 中列出的字段）
    fn update_batch(
        &self,
        table: &str,
        updates: &[(EntityId, FieldValues)],
        fields: &[String],
    ) -> StoreResult<usize>;

    /// 单条更新
    fn update_one(&self, table: &str, id: EntityId, record: &FieldValues) -> StoreResult<()>;

    /// 清空表（Replace 模式）
    fn delete_all(&self, table: &str) -> StoreResult<usize>;

    // ===== 事务边界 =====

    /// 建立保存点（无外层事务时等同于开启事务）
    fn savepoint(&self, name: &str) -> StoreResult<()>;

    /// 释放保存点（最外层释放即提交）
    fn release_savepoint(&self, name: &str) -> StoreResult<()>;

    /// 回滚到保存点（保存点仍保留,需再次释放）
    fn rollback_to_savepoint(&self, name: &str) -> StoreResult<()>;
}
