// ==========================================
// 表格导入引擎 - 行数据处理器
// ==========================================
// 职责: 按固定优先级计算单行字段值,然后做必填校验
// 顺序: 计算 → 直接列 → 转换列 → 常量 → 引用 → 查找
// 规则: 后阶段可覆盖前阶段的同名字段;必填校验只看最终值
// ==========================================

use crate::domain::import_config::{ComputeMode, FieldMapping, LookupSpec, StepPlan};
use crate::domain::import_record::{RowError, RowRecord};
use crate::domain::types::{CellValue, FieldValues};
use crate::importer::error::ImportResult;
use crate::importer::lookup_manager::LookupManager;
use crate::importer::transforms::{GeneratorContext, TransformRegistry};

/// 单行计算结果: 外层错误需升级到 chunk 级,内层错误只影响本行
pub type RowComputation = Result<FieldValues, RowError>;

pub struct DataProcessor<'a> {
    transforms: &'a TransformRegistry,
}

impl<'a> DataProcessor<'a> {
    pub fn new(transforms: &'a TransformRegistry) -> Self {
        Self { transforms }
    }

    /// 步骤是否作用于该行（only_if_present 中的列均非空）
    pub fn applies_to(step: &StepPlan, row: &RowRecord) -> bool {
        step.only_if_present
            .iter()
            .all(|column| !row.cell(column).is_blank())
    }

    /// 计算单行字段值
    ///
    /// # 返回
    /// - Ok(Ok(values)): 计算成功且通过必填校验
    /// - Ok(Err(RowError)): 行级失败（转换失败、引用缺失、查找未命中、必填缺失）
    /// - Err: 存储层非数据类错误（连接、锁等）
    pub fn compute_row(
        &self,
        step: &StepPlan,
        row: &RowRecord,
        lookups: &mut LookupManager<'_>,
    ) -> ImportResult<RowComputation> {
        let mut values = FieldValues::new();

        for mapping in &step.mappings {
            let value = match mapping {
                FieldMapping::Computed {
                    generator,
                    mode,
                    column,
                    ..
                } => {
                    let source = column.as_deref().map(|c| row.cell(c));
                    match (mode, source) {
                        (ComputeMode::IfEmpty, Some(v)) if !v.is_blank() => v.clone(),
                        _ => {
                            let ctx = GeneratorContext {
                                row,
                                values: &values,
                            };
                            match self.transforms.generate(generator, &ctx) {
                                Ok(v) => v,
                                Err(message) => {
                                    return Ok(Err(RowError::for_field(
                                        mapping.error_field(),
                                        format!("字段计算失败: {}", message),
                                    )))
                                }
                            }
                        }
                    }
                }
                FieldMapping::Direct { column, .. } => row.cell(column).clone(),
                FieldMapping::Transformed {
                    column, transform, ..
                } => match self.transforms.apply(transform, row.cell(column)) {
                    Ok(v) => v,
                    Err(message) => {
                        return Ok(Err(RowError::for_field(
                            mapping.error_field(),
                            format!("转换失败: {}", message),
                        )))
                    }
                },
                FieldMapping::Constant { value, .. } => value.clone(),
                FieldMapping::Reference { step: target, .. } => match row.references.get(target) {
                    Some(id) => CellValue::Integer(*id),
                    None => {
                        return Ok(Err(RowError::for_field(
                            mapping.error_field(),
                            format!("缺少前序步骤 {} 的对象", target),
                        )))
                    }
                },
                FieldMapping::Lookup(spec) => match self.resolve_lookup(spec, row, lookups)? {
                    Ok(v) => v,
                    Err(e) => return Ok(Err(e)),
                },
            };
            values.insert(mapping.field().to_string(), value);
        }

        if let Some(error) = Self::check_required(step, &values) {
            return Ok(Err(error));
        }
        Ok(Ok(values))
    }

    fn resolve_lookup(
        &self,
        spec: &LookupSpec,
        row: &RowRecord,
        lookups: &mut LookupManager<'_>,
    ) -> ImportResult<Result<CellValue, RowError>> {
        let raw = row.cell(&spec.column);
        if raw.is_blank() {
            return Ok(Ok(CellValue::Null));
        }

        if let Some(id) = lookups.resolve(&spec.table, &spec.lookup_field, raw) {
            return Ok(Ok(CellValue::Integer(id)));
        }

        if spec.create_if_missing {
            return match lookups.create_missing(&spec.table, &spec.lookup_field, raw) {
                Ok(id) => Ok(Ok(CellValue::Integer(id))),
                Err(e) if e.is_row_level() => Ok(Err(RowError::for_field(
                    spec.column.clone(),
                    format!("创建 {} 失败: {}", spec.table, e),
                ))),
                Err(e) => Err(e.into()),
            };
        }

        Ok(Err(RowError::for_field(
            spec.column.clone(),
            format!("查找失败: {} 中不存在 {} = {}", spec.table, spec.lookup_field, raw),
        )))
    }

    /// 必填校验（作用于全部阶段完成后的最终值）
    fn check_required(step: &StepPlan, values: &FieldValues) -> Option<RowError> {
        let missing: Vec<&str> = step
            .required_fields
            .iter()
            .filter(|f| values.get(*f).map_or(true, CellValue::is_blank))
            .map(String::as_str)
            .collect();
        let first = missing.first()?;

        // 归属字段取最终写入该字段的映射
        let field = step
            .mappings
            .iter()
            .rev()
            .find(|m| m.field() == *first)
            .map(|m| m.error_field())
            .unwrap_or_else(|| first.to_string());

        Some(RowError::for_field(
            field,
            format!("缺少必填字段: {}", missing.join(", ")),
        ))
    }
}
