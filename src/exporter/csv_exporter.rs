// ==========================================
// 表格导入引擎 - CSV 导出器
// ==========================================
// 布局: 文档头 → 空行 → 标题 → 空行 → 列头 → 数据 → 空行 → 日期页脚
// 安全: 以公式字符开头的单元格加 ' 前缀,防止表格软件执行公式
// ==========================================

use crate::domain::types::{CellValue, FieldValues};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::entity_store::EntityStore;
use chrono::{Local, NaiveDate};
use csv::WriterBuilder;
use std::collections::HashMap;
use tracing::info;

/// 表格软件会当作公式解释的首字符
const FORMULA_PREFIXES: [char; 6] = ['=', '+', '-', '@', '\t', '\r'];

/// 防公式注入
pub fn sanitize_spreadsheet_cell(value: &str) -> String {
    match value.chars().next() {
        Some(c) if FORMULA_PREFIXES.contains(&c) => format!("'{}", value),
        _ => value.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CsvExporter {
    /// 导出的字段（列顺序）
    pub includes: Vec<String>,
    /// 字段 → 列头显示名（缺省使用字段名）
    pub labels: HashMap<String, String>,
    /// 左上角文档头
    pub export_headers: Vec<String>,
    /// 表格上方标题
    pub document_titles: Vec<String>,
    /// 页脚日期（缺省为当天）
    pub working_date: Option<NaiveDate>,
}

impl CsvExporter {
    pub fn new(includes: Vec<String>) -> Self {
        Self {
            includes,
            ..Self::default()
        }
    }

    pub fn with_label(mut self, field: &str, label: &str) -> Self {
        self.labels.insert(field.to_string(), label.to_string());
        self
    }

    fn label<'a>(&'a self, field: &'a str) -> &'a str {
        self.labels.get(field).map(String::as_str).unwrap_or(field)
    }

    /// 渲染数据行
    ///
    /// # 返回
    /// - 空数据返回空文档
    pub fn export(&self, data_rows: &[FieldValues]) -> ImportResult<Vec<u8>> {
        if data_rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());

        for line in self.export_headers.iter().filter(|l| !l.trim().is_empty()) {
            writer.write_record([sanitize_spreadsheet_cell(line)])?;
        }
        if !self.export_headers.is_empty() {
            writer.write_record([""])?;
        }

        for title in self.document_titles.iter().filter(|t| !t.trim().is_empty()) {
            writer.write_record([sanitize_spreadsheet_cell(title)])?;
        }
        if !self.document_titles.is_empty() {
            writer.write_record([""])?;
        }

        writer.write_record(
            self.includes
                .iter()
                .map(|f| sanitize_spreadsheet_cell(self.label(f))),
        )?;

        for row in data_rows {
            writer.write_record(self.includes.iter().map(|f| {
                let value = row.get(f).map(CellValue::to_string).unwrap_or_default();
                sanitize_spreadsheet_cell(&value)
            }))?;
        }

        let date = self
            .working_date
            .unwrap_or_else(|| Local::now().date_naive());
        writer.write_record([""])?;
        writer.write_record([format!("日期: {}", date.format("%Y-%m-%d"))])?;

        writer
            .into_inner()
            .map_err(|e| ImportError::Other(anyhow::anyhow!("CSV 写出失败: {}", e.error())))
    }

    /// 导出整张表（按 id 排序）
    pub fn export_table(&self, store: &dyn EntityStore, table: &str) -> ImportResult<Vec<u8>> {
        let entities = store.list_all(table, &self.includes)?;
        let rows: Vec<FieldValues> = entities.into_iter().map(|e| e.values).collect();
        info!(table, rows = rows.len(), "导出表数据");
        self.export(&rows)
    }
}
