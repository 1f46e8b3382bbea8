// ==========================================
// 表格导入引擎 - 转换函数注册表
// ==========================================
// 职责: 按名称提供列转换函数与计算字段生成器
// 命名空间: transform 与 generator 互相独立,不可混用
// 内置转换: TRIM / UPPER / LOWER / 标志位 / 整数 / 小数 / 日期
// ==========================================

use crate::domain::import_record::RowRecord;
use crate::domain::types::{CellValue, EntityId, FieldValues};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;

/// 列转换函数: 输入已标准化的非空值
pub type TransformFn = Box<dyn Fn(&CellValue) -> Result<CellValue, String> + Send + Sync>;

/// 计算字段生成器
pub type GeneratorFn =
    Box<dyn Fn(&GeneratorContext<'_>) -> Result<CellValue, String> + Send + Sync>;

/// 生成器可见的上下文
pub struct GeneratorContext<'a> {
    /// 当前行（原始列值）
    pub row: &'a RowRecord,
    /// 本步骤到目前为止已计算的字段
    pub values: &'a FieldValues,
}

impl<'a> GeneratorContext<'a> {
    pub fn cell(&self, column: &str) -> &CellValue {
        self.row.cell(column)
    }

    /// 前序步骤为本行产出的实体 id
    pub fn reference(&self, step: &str) -> Option<EntityId> {
        self.row.references.get(step).copied()
    }
}

#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
    generators: HashMap<String, GeneratorFn>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带内置转换的注册表
    pub fn with_builtins() -> Self {
        Self::new()
            .with_transform("trim", |v| Ok(CellValue::Text(text_of(v).trim().to_string())))
            .with_transform("upper", |v| Ok(CellValue::Text(text_of(v).trim().to_uppercase())))
            .with_transform("lower", |v| Ok(CellValue::Text(text_of(v).trim().to_lowercase())))
            .with_transform("flag", parse_flag)
            .with_transform("integer", parse_integer)
            .with_transform("decimal", parse_decimal)
            .with_transform("date_yyyymmdd", parse_date)
    }

    pub fn with_transform<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&CellValue) -> Result<CellValue, String> + Send + Sync + 'static,
    {
        self.register_transform(name, f);
        self
    }

    pub fn with_generator<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&GeneratorContext<'_>) -> Result<CellValue, String> + Send + Sync + 'static,
    {
        self.register_generator(name, f);
        self
    }

    pub fn register_transform<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&CellValue) -> Result<CellValue, String> + Send + Sync + 'static,
    {
        self.transforms.insert(name.to_string(), Box::new(f));
    }

    pub fn register_generator<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&GeneratorContext<'_>) -> Result<CellValue, String> + Send + Sync + 'static,
    {
        self.generators.insert(name.to_string(), Box::new(f));
    }

    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub fn has_generator(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    /// 应用列转换
    ///
    /// # 返回
    /// - Ok(Null): 输入为空,转换被跳过
    /// - Err: 转换不存在或转换失败
    pub fn apply(&self, name: &str, value: &CellValue) -> Result<CellValue, String> {
        let transform = self
            .transforms
            .get(name)
            .ok_or_else(|| format!("转换函数不存在: {}", name))?;
        if value.is_blank() {
            return Ok(CellValue::Null);
        }
        transform(value)
    }

    /// 调用计算字段生成器
    pub fn generate(&self, name: &str, ctx: &GeneratorContext<'_>) -> Result<CellValue, String> {
        let generator = self
            .generators
            .get(name)
            .ok_or_else(|| format!("生成器不存在: {}", name))?;
        generator(ctx)
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut transforms: Vec<_> = self.transforms.keys().collect();
        let mut generators: Vec<_> = self.generators.keys().collect();
        transforms.sort();
        generators.sort();
        f.debug_struct("TransformRegistry")
            .field("transforms", &transforms)
            .field("generators", &generators)
            .finish()
    }
}

// ===== 内置转换 =====

fn text_of(value: &CellValue) -> String {
    value.as_text().unwrap_or_default()
}

/// 标志位: 1/Y/是/TRUE → true,0/N/否/FALSE → false,其余报错
fn parse_flag(value: &CellValue) -> Result<CellValue, String> {
    let flag = match value {
        CellValue::Bool(b) => Some(*b),
        CellValue::Integer(0) => Some(false),
        CellValue::Integer(1) => Some(true),
        other => match text_of(other).trim().to_uppercase().as_str() {
            "1" | "Y" | "是" | "TRUE" => Some(true),
            "0" | "N" | "否" | "FALSE" => Some(false),
            _ => None,
        },
    };
    flag.map(CellValue::Bool)
        .ok_or_else(|| format!("无法解析为是/否标志: {}", text_of(value)))
}

/// 整数值的浮点数 → i64（含小数或超出 i64 范围返回 None）
fn whole_f64_to_i64(f: f64) -> Option<i64> {
    // 2^63 可精确表示为 f64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT).then(|| f as i64)
}

fn parse_integer(value: &CellValue) -> Result<CellValue, String> {
    match value {
        CellValue::Integer(i) => Ok(CellValue::Integer(*i)),
        CellValue::Bool(b) => Ok(CellValue::Integer(i64::from(*b))),
        CellValue::Real(f) => whole_f64_to_i64(*f)
            .map(CellValue::Integer)
            .ok_or_else(|| format!("无法解析为整数: {}", f)),
        other => {
            let raw = text_of(other);
            let trimmed = raw.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(CellValue::Integer(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(whole_f64_to_i64)
                .map(CellValue::Integer)
                .ok_or_else(|| format!("无法解析为整数: {}", raw))
        }
    }
}

fn parse_decimal(value: &CellValue) -> Result<CellValue, String> {
    match value {
        CellValue::Real(f) => Ok(CellValue::Real(*f)),
        CellValue::Integer(i) => Ok(CellValue::Real(*i as f64)),
        other => {
            let raw = text_of(other);
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(CellValue::Real)
                .ok_or_else(|| format!("无法解析为数值: {}", raw))
        }
    }
}

/// 日期: 兼容 YYYYMMDD 与 YYYY-MM-DD,统一输出 YYYY-MM-DD
fn parse_date(value: &CellValue) -> Result<CellValue, String> {
    let raw = text_of(value);
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map(|d| CellValue::Text(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| format!("日期格式错误: 期望 YYYYMMDD,实际 {}", raw))
}
