// ==========================================
// 表格导入引擎 - 导入配置模型
// ==========================================
// 职责: 声明式导入配置的两种形态
// - RawImportConfig: JSON 原样反序列化,字段全部可缺省
// - ImportPlan: 经 ConfigValidator 校验后的封闭结构（映射为 tagged enum）
// 红线: 行处理阶段只读取 ImportPlan,不再解析原始配置
// ==========================================

use crate::domain::types::{CellValue, FileFormat};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ==========================================
// 原始配置 (JSON 形态)
// ==========================================
// 映射组使用 IndexMap: 同一阶段内按声明顺序执行

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawImportConfig {
    pub file_format: Option<String>,
    pub order: Option<Vec<String>>,
    pub models: Option<IndexMap<String, RawStepConfig>>,
    pub chunk_size: Option<i64>,
    pub header_row: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStepConfig {
    pub model: Option<String>,
    #[serde(default)]
    pub unique_by: Vec<String>,
    #[serde(default)]
    pub update_if_exists: bool,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub only_if_present: Vec<String>,
    pub computed_fields: Option<IndexMap<String, RawComputedSpec>>,
    pub direct_columns: Option<RawDirectColumns>,
    pub transformed_columns: Option<IndexMap<String, RawTransformSpec>>,
    pub constant_fields: Option<IndexMap<String, serde_json::Value>>,
    pub reference_fields: Option<IndexMap<String, String>>,
    pub lookup_fields: Option<IndexMap<String, RawLookupSpec>>,
}

impl RawStepConfig {
    /// 是否至少声明了一个映射组
    pub fn has_any_mapping_group(&self) -> bool {
        self.computed_fields.is_some()
            || self.direct_columns.is_some()
            || self.transformed_columns.is_some()
            || self.constant_fields.is_some()
            || self.reference_fields.is_some()
            || self.lookup_fields.is_some()
    }
}

/// 直接列映射: 既可写成 {字段: 列名},也可写成 [列名]（字段名 = 列名）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDirectColumns {
    Map(IndexMap<String, String>),
    List(Vec<String>),
}

impl RawDirectColumns {
    /// 展开为 (字段, 列名) 列表
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            RawDirectColumns::Map(map) => map
                .iter()
                .map(|(field, column)| (field.clone(), column.clone()))
                .collect(),
            RawDirectColumns::List(columns) => columns
                .iter()
                .map(|column| (column.clone(), column.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComputedSpec {
    pub generator: String,
    pub mode: Option<String>,
    pub column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransformSpec {
    pub column: String,
    pub transform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLookupSpec {
    pub column: String,
    pub model: String,
    pub lookup_field: String,
    #[serde(default)]
    pub create_if_missing: bool,
}

// ==========================================
// 校验后的导入计划
// ==========================================

/// 计算字段模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeMode {
    /// 源列有值则沿用,为空才调用生成器
    IfEmpty,
    /// 始终调用生成器
    Always,
}

impl ComputeMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "if_empty" => Some(ComputeMode::IfEmpty),
            "always" => Some(ComputeMode::Always),
            _ => None,
        }
    }
}

/// 映射阶段（声明顺序即计算顺序,后阶段可覆盖前阶段同名字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MappingStage {
    Computed,
    Direct,
    Transformed,
    Constant,
    Reference,
    Lookup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub field: String,
    pub column: String,
    pub table: String,
    pub lookup_field: String,
    pub create_if_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldMapping {
    Computed {
        field: String,
        generator: String,
        mode: ComputeMode,
        column: Option<String>,
    },
    Direct {
        field: String,
        column: String,
    },
    Transformed {
        field: String,
        column: String,
        transform: String,
    },
    Constant {
        field: String,
        value: CellValue,
    },
    Reference {
        field: String,
        step: String,
    },
    Lookup(LookupSpec),
}

impl FieldMapping {
    /// 目标字段名
    pub fn field(&self) -> &str {
        match self {
            FieldMapping::Computed { field, .. }
            | FieldMapping::Direct { field, .. }
            | FieldMapping::Transformed { field, .. }
            | FieldMapping::Constant { field, .. }
            | FieldMapping::Reference { field, .. } => field,
            FieldMapping::Lookup(spec) => &spec.field,
        }
    }

    pub fn stage(&self) -> MappingStage {
        match self {
            FieldMapping::Computed { .. } => MappingStage::Computed,
            FieldMapping::Direct { .. } => MappingStage::Direct,
            FieldMapping::Transformed { .. } => MappingStage::Transformed,
            FieldMapping::Constant { .. } => MappingStage::Constant,
            FieldMapping::Reference { .. } => MappingStage::Reference,
            FieldMapping::Lookup(_) => MappingStage::Lookup,
        }
    }

    /// 读取的源列（常量/引用字段无源列）
    pub fn source_column(&self) -> Option<&str> {
        match self {
            FieldMapping::Computed { column, .. } => column.as_deref(),
            FieldMapping::Direct { column, .. } | FieldMapping::Transformed { column, .. } => {
                Some(column)
            }
            FieldMapping::Lookup(spec) => Some(&spec.column),
            FieldMapping::Constant { .. } | FieldMapping::Reference { .. } => None,
        }
    }

    /// 错误归属字段: 读列的映射报列名,其余报目标字段名
    pub fn error_field(&self) -> String {
        self.source_column()
            .unwrap_or_else(|| self.field())
            .to_string()
    }
}

/// 单个模型步骤的执行计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPlan {
    pub name: String,
    pub table: String,
    /// 已按 MappingStage 排序
    pub mappings: Vec<FieldMapping>,
    pub unique_by: Vec<String>,
    pub update_if_exists: bool,
    pub required_fields: Vec<String>,
    pub only_if_present: Vec<String>,
    /// 是否被后续步骤的引用字段引用（决定新建是否必须逐行落库）
    pub referenced_later: bool,
}

impl StepPlan {
    pub fn lookups(&self) -> impl Iterator<Item = &LookupSpec> {
        self.mappings.iter().filter_map(|m| match m {
            FieldMapping::Lookup(spec) => Some(spec),
            _ => None,
        })
    }
}

/// 校验后的导入计划（不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPlan {
    pub file_format: FileFormat,
    pub header_row: usize,
    pub chunk_size: Option<usize>,
    pub steps: Vec<StepPlan>,
}

impl ImportPlan {
    /// 声明列集合（按步骤与映射顺序首次出现排序,去重）
    pub fn declared_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for step in &self.steps {
            let mapped = step.mappings.iter().filter_map(|m| m.source_column());
            let filters = step.only_if_present.iter().map(String::as_str);
            for column in mapped.chain(filters) {
                if seen.insert(column.to_string()) {
                    columns.push(column.to_string());
                }
            }
        }
        columns
    }

    /// 为必填字段供值的源列
    pub fn required_columns(&self) -> HashSet<String> {
        let mut columns = HashSet::new();
        for step in &self.steps {
            for mapping in &step.mappings {
                if step.required_fields.iter().any(|f| f == mapping.field()) {
                    if let Some(column) = mapping.source_column() {
                        columns.insert(column.to_string());
                    }
                }
            }
            columns.extend(step.only_if_present.iter().cloned());
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_columns_accept_list_and_map() {
        let list: RawDirectColumns = serde_json::from_str(r#"["name", "email"]"#).unwrap();
        assert_eq!(
            list.pairs(),
            vec![
                ("name".to_string(), "name".to_string()),
                ("email".to_string(), "email".to_string())
            ]
        );

        let map: RawDirectColumns = serde_json::from_str(r#"{"name": "Name"}"#).unwrap();
        assert_eq!(map.pairs(), vec![("name".to_string(), "Name".to_string())]);
    }

    #[test]
    fn test_mapping_stage_order() {
        assert!(MappingStage::Computed < MappingStage::Direct);
        assert!(MappingStage::Constant < MappingStage::Reference);
        assert!(MappingStage::Reference < MappingStage::Lookup);
    }

    #[test]
    fn test_error_field_prefers_source_column() {
        let lookup = FieldMapping::Lookup(LookupSpec {
            field: "country_id".into(),
            column: "country_code".into(),
            table: "country".into(),
            lookup_field: "code".into(),
            create_if_missing: false,
        });
        assert_eq!(lookup.error_field(), "country_code");

        let constant = FieldMapping::Constant {
            field: "active".into(),
            value: CellValue::Bool(true),
        };
        assert_eq!(constant.error_field(), "active");
    }
}
