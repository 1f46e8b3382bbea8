// ==========================================
// 表格导入引擎 - 导出层
// ==========================================
// 职责: 将存储中的实体写出为 CSV
// ==========================================

pub mod csv_exporter;

pub use csv_exporter::{sanitize_spreadsheet_cell, CsvExporter};
