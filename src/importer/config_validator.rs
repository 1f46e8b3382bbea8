// ==========================================
// 表格导入引擎 - 配置校验器
// ==========================================
// 职责: 将原始 JSON 配置一次性校验为封闭的 ImportPlan
// 红线: 所有检查在读取文件之前完成,行处理阶段不再做配置判断
// ==========================================

use crate::domain::import_config::{
    ComputeMode, FieldMapping, ImportPlan, LookupSpec, RawImportConfig, RawStepConfig, StepPlan,
};
use crate::domain::types::{CellValue, FileFormat};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::transforms::TransformRegistry;
use crate::repository::entity_store::EntityStore;
use crate::repository::error::StoreError;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// 从 JSON 文本读取原始配置
pub fn parse_config(json: &str) -> ImportResult<RawImportConfig> {
    Ok(serde_json::from_str(json)?)
}

pub struct ConfigValidator<'a> {
    transforms: &'a TransformRegistry,
    store: &'a dyn EntityStore,
}

impl<'a> ConfigValidator<'a> {
    /// # 参数
    /// - transforms: 配置中引用的转换函数/生成器必须在此注册
    /// - store: 用于检查目标表与查找字段是否存在
    pub fn new(transforms: &'a TransformRegistry, store: &'a dyn EntityStore) -> Self {
        Self { transforms, store }
    }

    /// 校验配置并生成导入计划
    ///
    /// # 返回
    /// - Ok(ImportPlan): 校验通过
    /// - Err(Configuration): 指明出错的 key
    pub fn validate(&self, raw: &RawImportConfig) -> ImportResult<ImportPlan> {
        let file_format = match raw.file_format.as_deref() {
            None => return Err(ImportError::config("file_format", "缺少必填配置项")),
            Some(s) => FileFormat::parse(s).ok_or_else(|| {
                ImportError::config("file_format", format!("不支持的文件格式: {}", s))
            })?,
        };

        let order = raw
            .order
            .as_ref()
            .ok_or_else(|| ImportError::config("order", "缺少必填配置项"))?;
        let models = raw
            .models
            .as_ref()
            .ok_or_else(|| ImportError::config("models", "缺少必填配置项"))?;

        if order.is_empty() {
            return Err(ImportError::config("order", "步骤列表不能为空"));
        }

        let chunk_size = match raw.chunk_size {
            None => None,
            Some(n) if n >= 1 => Some(n as usize),
            Some(n) => {
                return Err(ImportError::config(
                    "chunk_size",
                    format!("必须为 >= 1 的整数,实际 {}", n),
                ))
            }
        };

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (idx, name) in order.iter().enumerate() {
            if positions.insert(name.as_str(), idx).is_some() {
                return Err(ImportError::config("order", format!("步骤重复: {}", name)));
            }
        }

        for name in models.keys() {
            if !positions.contains_key(name.as_str()) {
                warn!(step = %name, "步骤未出现在 order 中,已忽略");
            }
        }

        let mut steps = Vec::with_capacity(order.len());
        for (idx, name) in order.iter().enumerate() {
            let step = models.get(name).ok_or_else(|| {
                ImportError::config(format!("models.{}", name), "order 中的步骤未定义")
            })?;
            steps.push(self.validate_step(name, idx, step, &positions)?);
        }

        // 被后续步骤引用的步骤
        let referenced: HashSet<String> = steps
            .iter()
            .flat_map(|s| s.mappings.iter())
            .filter_map(|m| match m {
                FieldMapping::Reference { step, .. } => Some(step.clone()),
                _ => None,
            })
            .collect();
        for step in &mut steps {
            step.referenced_later = referenced.contains(&step.name);
        }

        debug!(steps = steps.len(), format = %file_format, "配置校验通过");

        Ok(ImportPlan {
            file_format,
            header_row: raw
                .header_row
                .unwrap_or_else(|| file_format.default_header_row()),
            chunk_size,
            steps,
        })
    }

    fn validate_step(
        &self,
        name: &str,
        position: usize,
        step: &RawStepConfig,
        positions: &HashMap<&str, usize>,
    ) -> ImportResult<StepPlan> {
        let key = |suffix: &str| format!("models.{}.{}", name, suffix);

        let table = step
            .model
            .clone()
            .ok_or_else(|| ImportError::config(key("model"), "缺少目标模型"))?;

        if !step.has_any_mapping_group() {
            return Err(ImportError::config(
                format!("models.{}", name),
                "未声明任何字段映射组",
            ));
        }

        let table_columns = self.table_columns(&table, &key("model"))?;
        let mut mappings = Vec::new();

        if let Some(computed) = &step.computed_fields {
            for (field, spec) in computed {
                let field_key = key(&format!("computed_fields.{}", field));
                if !self.transforms.has_generator(&spec.generator) {
                    return Err(ImportError::config(
                        field_key,
                        format!("生成器不存在: {}", spec.generator),
                    ));
                }
                let mode = match spec.mode.as_deref() {
                    None => ComputeMode::IfEmpty,
                    Some(m) => ComputeMode::parse(m).ok_or_else(|| {
                        ImportError::config(
                            field_key.clone(),
                            format!("mode 只能为 if_empty 或 always,实际 {}", m),
                        )
                    })?,
                };
                mappings.push(FieldMapping::Computed {
                    field: field.clone(),
                    generator: spec.generator.clone(),
                    mode,
                    column: spec.column.clone(),
                });
            }
        }

        if let Some(direct) = &step.direct_columns {
            for (field, column) in direct.pairs() {
                mappings.push(FieldMapping::Direct { field, column });
            }
        }

        if let Some(transformed) = &step.transformed_columns {
            for (field, spec) in transformed {
                if !self.transforms.has_transform(&spec.transform) {
                    return Err(ImportError::config(
                        key(&format!("transformed_columns.{}", field)),
                        format!("转换函数不存在: {}", spec.transform),
                    ));
                }
                mappings.push(FieldMapping::Transformed {
                    field: field.clone(),
                    column: spec.column.clone(),
                    transform: spec.transform.clone(),
                });
            }
        }

        if let Some(constants) = &step.constant_fields {
            for (field, value) in constants {
                let value = CellValue::from_json(value).ok_or_else(|| {
                    ImportError::config(
                        key(&format!("constant_fields.{}", field)),
                        "常量只能为标量（null/bool/number/string）",
                    )
                })?;
                mappings.push(FieldMapping::Constant {
                    field: field.clone(),
                    value,
                });
            }
        }

        if let Some(references) = &step.reference_fields {
            for (field, target) in references {
                match positions.get(target.as_str()) {
                    Some(&p) if p < position => {}
                    Some(_) => {
                        return Err(ImportError::config(
                            key(&format!("reference_fields.{}", field)),
                            format!("引用的步骤 {} 必须位于 {} 之前", target, name),
                        ))
                    }
                    None => {
                        return Err(ImportError::config(
                            key(&format!("reference_fields.{}", field)),
                            format!("引用的步骤不存在: {}", target),
                        ))
                    }
                }
                mappings.push(FieldMapping::Reference {
                    field: field.clone(),
                    step: target.clone(),
                });
            }
        }

        if let Some(lookups) = &step.lookup_fields {
            for (field, spec) in lookups {
                let field_key = key(&format!("lookup_fields.{}", field));
                let target_columns = self.table_columns(&spec.model, &field_key)?;
                if !target_columns.contains(&spec.lookup_field) {
                    return Err(ImportError::config(
                        field_key,
                        format!("{} 不是 {} 的字段", spec.lookup_field, spec.model),
                    ));
                }
                mappings.push(FieldMapping::Lookup(LookupSpec {
                    field: field.clone(),
                    column: spec.column.clone(),
                    table: spec.model.clone(),
                    lookup_field: spec.lookup_field.clone(),
                    create_if_missing: spec.create_if_missing,
                }));
            }
        }

        for mapping in &mappings {
            if !table_columns.contains(mapping.field()) {
                return Err(ImportError::config(
                    format!("models.{}", name),
                    format!("字段 {} 不存在于表 {}", mapping.field(), table),
                ));
            }
        }

        // 稳定排序: 同阶段内保持声明顺序
        mappings.sort_by_key(|m| m.stage());

        let produced: HashSet<&str> = mappings.iter().map(|m| m.field()).collect();
        for field in &step.required_fields {
            if !produced.contains(field.as_str()) {
                return Err(ImportError::config(
                    key("required_fields"),
                    format!("必填字段 {} 未出现在任何映射组中", field),
                ));
            }
        }
        for field in &step.unique_by {
            if !produced.contains(field.as_str()) {
                return Err(ImportError::config(
                    key("unique_by"),
                    format!("唯一键字段 {} 未出现在任何映射组中", field),
                ));
            }
        }

        Ok(StepPlan {
            name: name.to_string(),
            table,
            mappings,
            unique_by: step.unique_by.clone(),
            update_if_exists: step.update_if_exists,
            required_fields: step.required_fields.clone(),
            only_if_present: step.only_if_present.clone(),
            referenced_later: false,
        })
    }

    /// 读取表的列集合,表不存在视为配置错误
    fn table_columns(&self, table: &str, key: &str) -> ImportResult<HashSet<String>> {
        match self.store.column_names(table) {
            Ok(columns) => Ok(columns.into_iter().collect()),
            Err(StoreError::TableNotFound(_)) | Err(StoreError::InvalidIdentifier(_)) => Err(
                ImportError::config(key, format!("目标模型不存在: {}", table)),
            ),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::entity_store_impl::SqliteEntityStore;
    use rusqlite::Connection;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn store() -> SqliteEntityStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE country (id INTEGER PRIMARY KEY, name TEXT, code TEXT UNIQUE);
            CREATE TABLE city (id INTEGER PRIMARY KEY, name TEXT, country_id INTEGER);
            "#,
        )
        .unwrap();
        SqliteEntityStore::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn raw(value: serde_json::Value) -> RawImportConfig {
        serde_json::from_value(value).unwrap()
    }

    fn base_config() -> serde_json::Value {
        json!({
            "file_format": "csv",
            "order": ["country", "city"],
            "models": {
                "country": {
                    "model": "country",
                    "unique_by": ["code"],
                    "required_fields": ["name", "code"],
                    "only_if_present": ["code"],
                    "direct_columns": {"name": "name", "code": "code"}
                },
                "city": {
                    "model": "city",
                    "required_fields": ["name", "country_id"],
                    "only_if_present": ["country_code"],
                    "direct_columns": {"name": "name"},
                    "lookup_fields": {
                        "country_id": {"column": "country_code", "model": "country", "lookup_field": "code"}
                    }
                }
            }
        })
    }

    fn validate(value: serde_json::Value) -> ImportResult<ImportPlan> {
        let registry = TransformRegistry::with_builtins();
        let store = store();
        ConfigValidator::new(&registry, &store).validate(&raw(value))
    }

    #[test]
    fn test_valid_config_builds_plan() {
        let plan = validate(base_config()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.header_row, 0);
        assert_eq!(plan.declared_columns(), vec!["name", "code", "country_code"]);
        assert!(!plan.steps[0].referenced_later);
    }

    #[test]
    fn test_missing_top_level_key() {
        let mut config = base_config();
        config.as_object_mut().unwrap().remove("order");
        assert_eq!(validate(config).unwrap_err().config_key(), Some("order"));
    }

    #[test]
    fn test_unsupported_format() {
        let mut config = base_config();
        config["file_format"] = json!("pdf");
        assert_eq!(validate(config).unwrap_err().config_key(), Some("file_format"));
    }

    #[test]
    fn test_chunk_size_must_be_positive() {
        let mut config = base_config();
        config["chunk_size"] = json!(0);
        assert_eq!(validate(config).unwrap_err().config_key(), Some("chunk_size"));
    }

    #[test]
    fn test_reference_must_point_backwards() {
        let mut config = base_config();
        config["models"]["country"]["reference_fields"] = json!({"name": "city"});
        let err = validate(config).unwrap_err();
        assert_eq!(err.config_key(), Some("models.country.reference_fields.name"));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut config = base_config();
        config["models"]["city"]["reference_fields"] = json!({"country_id": "city"});
        assert!(validate(config).is_err());
    }

    #[test]
    fn test_reference_marks_target_step() {
        let mut config = base_config();
        config["models"]["city"]["reference_fields"] = json!({"country_id": "country"});
        config["models"]["city"].as_object_mut().unwrap().remove("lookup_fields");
        let plan = validate(config).unwrap();
        assert!(plan.steps[0].referenced_later);
        assert!(!plan.steps[1].referenced_later);
    }

    #[test]
    fn test_undefined_step_in_order() {
        let mut config = base_config();
        config["order"] = json!(["country", "city", "region"]);
        assert_eq!(validate(config).unwrap_err().config_key(), Some("models.region"));
    }

    #[test]
    fn test_step_without_mappings() {
        let mut config = base_config();
        config["models"]["city"] = json!({"model": "city"});
        assert_eq!(validate(config).unwrap_err().config_key(), Some("models.city"));
    }

    #[test]
    fn test_required_field_must_be_mapped() {
        let mut config = base_config();
        config["models"]["country"]["required_fields"] = json!(["name", "capital"]);
        assert_eq!(
            validate(config).unwrap_err().config_key(),
            Some("models.country.required_fields")
        );
    }

    #[test]
    fn test_lookup_field_must_exist_on_target() {
        let mut config = base_config();
        config["models"]["city"]["lookup_fields"]["country_id"]["lookup_field"] = json!("iso");
        assert_eq!(
            validate(config).unwrap_err().config_key(),
            Some("models.city.lookup_fields.country_id")
        );
    }

    #[test]
    fn test_unknown_transform_and_generator() {
        let mut config = base_config();
        config["models"]["country"]["transformed_columns"] =
            json!({"code": {"column": "code", "transform": "rot13"}});
        assert!(validate(config).is_err());

        let mut config = base_config();
        config["models"]["country"]["computed_fields"] =
            json!({"code": {"generator": "upper"}});
        // upper 是转换函数,不是生成器
        assert_eq!(
            validate(config).unwrap_err().config_key(),
            Some("models.country.computed_fields.code")
        );
    }

    #[test]
    fn test_missing_table_is_configuration_error() {
        let mut config = base_config();
        config["models"]["city"]["model"] = json!("town");
        assert_eq!(validate(config).unwrap_err().config_key(), Some("models.city.model"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let registry = TransformRegistry::with_builtins();
        let store = store();
        let validator = ConfigValidator::new(&registry, &store);

        let good = raw(base_config());
        assert!(validator.validate(&good).is_ok());
        assert!(validator.validate(&good).is_ok());

        let mut bad = base_config();
        bad["chunk_size"] = json!(-3);
        let bad = raw(bad);
        let first = validator.validate(&bad).unwrap_err().to_string();
        let second = validator.validate(&bad).unwrap_err().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_config_rejects_malformed_json() {
        assert!(matches!(
            parse_config("{not json"),
            Err(ImportError::Configuration { .. })
        ));
    }
}
