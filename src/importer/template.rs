// ==========================================
// 表格导入引擎 - 导入模板生成
// ==========================================
// 职责: 根据导入计划生成空白 CSV 模板（只有表头）
// ==========================================

use crate::domain::import_config::ImportPlan;
use crate::importer::error::{ImportError, ImportResult};
use csv::WriterBuilder;

/// 模板列顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnOrder {
    /// 为必填字段供值的列在前
    #[default]
    RequiredFirst,
    /// 按配置声明顺序
    Declared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTemplate {
    pub columns: Vec<String>,
}

impl ImportTemplate {
    pub fn from_plan(plan: &ImportPlan, order: ColumnOrder) -> Self {
        let declared = plan.declared_columns();
        let columns = match order {
            ColumnOrder::Declared => declared,
            ColumnOrder::RequiredFirst => {
                let required = plan.required_columns();
                let (mut first, rest): (Vec<String>, Vec<String>) =
                    declared.into_iter().partition(|c| required.contains(c));
                first.extend(rest);
                first
            }
        };
        Self { columns }
    }

    /// 渲染为 CSV 文本（单行表头）
    pub fn to_csv(&self) -> ImportResult<String> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| ImportError::Other(anyhow::anyhow!("模板写出失败: {}", e.error())))?;
        String::from_utf8(bytes).map_err(|e| ImportError::Other(e.into()))
    }
}
