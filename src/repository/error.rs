// ==========================================
// 表格导入引擎 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类: 数据类错误可逐行降级处理;其余错误上抛到 chunk 级
// ==========================================

use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    // ===== 数据类错误（行级可恢复）=====
    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    #[error("约束违反: {0}")]
    ConstraintViolation(String),

    #[error("数据类型不匹配: {0}")]
    DataTypeMismatch(String),

    #[error("记录未找到: {table} id={id}")]
    NotFound { table: String, id: i64 },

    // ===== 结构/基础设施错误（不可逐行恢复）=====
    #[error("表不存在: {0}")]
    TableNotFound(String),

    #[error("非法标识符: {0}")]
    InvalidIdentifier(String),

    #[error("数据库连接失败: {0}")]
    ConnectionError(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    TransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// 是否为单行数据问题（批量失败后逐行重试时可归因到具体行）
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueConstraintViolation(_)
                | StoreError::ForeignKeyViolation(_)
                | StoreError::ConstraintViolation(_)
                | StoreError::DataTypeMismatch(_)
                | StoreError::NotFound { .. }
        )
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err {
            rusqlite::Error::SqliteFailure(code, msg) => {
                let message = msg.unwrap_or_else(|| code.to_string());
                match code.code {
                    ErrorCode::ConstraintViolation => {
                        if message.contains("UNIQUE") {
                            StoreError::UniqueConstraintViolation(message)
                        } else if message.contains("FOREIGN KEY") {
                            StoreError::ForeignKeyViolation(message)
                        } else {
                            StoreError::ConstraintViolation(message)
                        }
                    }
                    ErrorCode::TypeMismatch | ErrorCode::TooBig => {
                        StoreError::DataTypeMismatch(message)
                    }
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                        StoreError::LockError(message)
                    }
                    ErrorCode::CannotOpen | ErrorCode::NotADatabase => {
                        StoreError::ConnectionError(message)
                    }
                    _ => StoreError::DatabaseQueryError(message),
                }
            }
            rusqlite::Error::ToSqlConversionFailure(e) => {
                StoreError::DataTypeMismatch(e.to_string())
            }
            rusqlite::Error::InvalidColumnType(_, name, ty) => {
                StoreError::DataTypeMismatch(format!("列 {} 类型 {}", name, ty))
            }
            _ => StoreError::DatabaseQueryError(err.to_string()),
        }
    }
}

/// Result 类型别名
pub type StoreResult<T> = Result<T, StoreError>;
