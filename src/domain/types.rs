// ==========================================
// 表格导入引擎 - 领域类型定义
// ==========================================
// 职责: 单元格值、文件格式、行状态、导入模式
// 红线: 纯数据类型,不含存储与解析逻辑
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 实体标识（目标表的 id 主键）
pub type EntityId = i64;

/// 字段名 → 值（有序,保证生成的 SQL 列顺序稳定）
pub type FieldValues = BTreeMap<String, CellValue>;

// ==========================================
// 单元格值 (Cell Value)
// ==========================================
// 文件解析、字段计算、落库共用同一种值类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

/// 解析器占位值（pandas 风格导出的 nan/none 等）
const NULL_PLACEHOLDERS: [&str; 2] = ["nan", "none"];

impl CellValue {
    /// 从原始文本构造单元格值（TRIM + 占位值标准化为 Null）
    pub fn from_raw_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || NULL_PLACEHOLDERS.contains(&trimmed.to_lowercase().as_str()) {
            CellValue::Null
        } else {
            CellValue::Text(trimmed.to_string())
        }
    }

    /// 从 JSON 标量构造（数组/对象返回 None）
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(CellValue::Null),
            serde_json::Value::Bool(b) => Some(CellValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(CellValue::Integer(i)),
                None => n.as_f64().map(CellValue::Real),
            },
            serde_json::Value::String(s) => Some(CellValue::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// 是否为空值（Null 或空白文本）
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 规范化比较键
    ///
    /// # 说明
    /// - CSV 读入的 "42" 与库中 INTEGER 42 必须视为同一个键
    /// - 小数部分为 0 的浮点数按整数输出
    /// - 布尔值按 SQLite 存储形式输出 1/0
    ///
    /// # 返回
    /// - None: 空值（不参与唯一键/查找）
    pub fn as_key(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Real(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    Some((*f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }

    /// 文本视图（Null 返回 None）
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Real(v) => write!(f, "{}", v),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

// ==========================================
// 文件格式 (File Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Xlsx,
    Xls,
}

impl FileFormat {
    /// 从配置字符串解析（大小写不敏感,允许带点前缀）
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "xlsx" => Some(FileFormat::Xlsx),
            "xls" => Some(FileFormat::Xls),
            _ => None,
        }
    }

    /// 表头所在行（0 基）
    ///
    /// 三种格式的模板都把表头放在首行;需要偏移时由配置 header_row 覆写
    pub fn default_header_row(&self) -> usize {
        match self {
            FileFormat::Csv => 0,
            FileFormat::Xlsx | FileFormat::Xls => 0,
        }
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self, FileFormat::Xlsx | FileFormat::Xls)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Csv => write!(f, "csv"),
            FileFormat::Xlsx => write!(f, "xlsx"),
            FileFormat::Xls => write!(f, "xls"),
        }
    }
}

// ==========================================
// 行状态 (Row Status)
// ==========================================
// 状态机: Pending → Succeeded | Failed
// 红线: Failed 为终态,任何后续步骤不得回退或改写
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RowStatus::Pending)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Pending => write!(f, "PENDING"),
            RowStatus::Succeeded => write!(f, "SUCCEEDED"),
            RowStatus::Failed => write!(f, "FAILED"),
        }
    }
}

// ==========================================
// 导入模式 (Import Mode)
// ==========================================
// Append: 允许部分成功
// Replace: 全有或全无,任一行失败则整体回滚（含清空旧数据）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    #[default]
    Append,
    Replace,
}

impl ImportMode {
    /// 解析布尔风格的请求参数（true/false, 1/0, yes/no, on/off）
    pub fn parse_flag(raw: &str) -> Option<bool> {
        match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Some(true),
            "false" | "0" | "no" | "n" | "off" | "" => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Append => write!(f, "APPEND"),
            ImportMode::Replace => write!(f, "REPLACE"),
        }
    }
}
