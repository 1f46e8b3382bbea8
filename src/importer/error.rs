// ==========================================
// 表格导入引擎 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 传播: 配置/文件格式错误直接返回调用方;行级错误以 RowError 进入行状态
// ==========================================

use crate::repository::error::StoreError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 致命错误（读取任何数据行之前）=====
    #[error("配置错误 (key: {key}): {message}")]
    Configuration { key: String, message: String },

    #[error("文件格式错误: {0}")]
    FileFormat(String),

    // ===== 存储错误（逃逸出逐行降级时升级为 chunk 级失败）=====
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// 配置错误指向的 key（其余错误返回 None）
    pub fn config_key(&self) -> Option<&str> {
        match self {
            ImportError::Configuration { key, .. } => Some(key),
            _ => None,
        }
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileFormat(format!("文件读取失败: {}", err))
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::FileFormat(format!("CSV 解析失败: {}", err))
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::FileFormat(format!("Excel 解析失败: {}", err))
    }
}

impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::FileFormat(format!("Excel 解析失败: {}", err))
    }
}

impl From<calamine::XlsError> for ImportError {
    fn from(err: calamine::XlsError) -> Self {
        ImportError::FileFormat(format!("Excel 解析失败: {}", err))
    }
}

// 实现 From<serde_json::Error>（配置文档本身无法解析）
impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::config("<document>", format!("JSON 解析失败: {}", err))
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
