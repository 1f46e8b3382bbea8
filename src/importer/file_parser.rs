// ==========================================
// 表格导入引擎 - 文件解析器实现
// ==========================================
// 支持: CSV (.csv) / Excel (.xlsx/.xls)
// 输入: 上传文件的字节流（不落地）
// 红线: 表头集合必须与配置声明的列集合完全一致（多列/缺列均拒绝）
// ==========================================

use crate::domain::import_config::ImportPlan;
use crate::domain::import_record::RowRecord;
use crate::domain::types::{CellValue, FileFormat};
use crate::importer::error::{ImportError, ImportResult};
use calamine::{Data, DataType, Range, Reader, Xls, Xlsx};
use chrono::Timelike;
use csv::ReaderBuilder;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Cursor;
use tracing::{debug, info};

/// 解析后的表格
#[derive(Debug, Clone)]
pub struct Table {
    /// 已 TRIM 的列名（文件中的顺序）
    pub headers: Vec<String>,
    pub rows: Vec<RowRecord>,
}

// ==========================================
// FileParser Trait
// ==========================================
// 实现者: CsvParser / ExcelParser
pub trait FileParser {
    /// 解析字节流
    ///
    /// # 参数
    /// - bytes: 文件内容
    /// - header_row: 表头所在行（0 基）
    ///
    /// # 返回
    /// - Table: 行号为文件中的 1 基行号,完全空白的行已跳过
    fn parse(&self, bytes: &[u8], header_row: usize) -> ImportResult<Table>;
}

/// 将一行原始值组装为 RowRecord（完全空白返回 None）
///
/// 无列名的位置（空表头或超出表头宽度）出现非空值时拒绝整个文件
fn build_row(
    row_number: usize,
    headers: &[String],
    values: impl Iterator<Item = CellValue>,
) -> ImportResult<Option<RowRecord>> {
    let mut cells = HashMap::new();
    for (idx, value) in values.enumerate() {
        match headers.get(idx) {
            Some(header) if !header.is_empty() => {
                cells.insert(header.clone(), value);
            }
            _ if value.is_blank() => {}
            _ => {
                return Err(ImportError::FileFormat(format!(
                    "表头不匹配（多余列: 第 {} 列无列名,第 {} 行有数据）",
                    idx + 1,
                    row_number
                )));
            }
        }
    }
    if cells.values().all(CellValue::is_blank) {
        return Ok(None);
    }
    Ok(Some(RowRecord::new(row_number, cells)))
}

fn clean_headers(raw: impl Iterator<Item = String>) -> ImportResult<Vec<String>> {
    let headers: Vec<String> = raw
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut seen = HashSet::new();
    for header in headers.iter().filter(|h| !h.is_empty()) {
        if !seen.insert(header) {
            return Err(ImportError::FileFormat(format!("表头重复: {}", header)));
        }
    }
    Ok(headers)
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse(&self, bytes: &[u8], header_row: usize) -> ImportResult<Table> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .from_reader(bytes);

        let mut headers: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            if idx < header_row {
                continue;
            }
            match &headers {
                None => {
                    headers = Some(clean_headers(record.iter().map(str::to_string))?);
                }
                Some(h) => {
                    // 以记录起始行作为行号（csv 会跳过纯空行）
                    let row_number = record
                        .position()
                        .map(|p| p.line() as usize)
                        .unwrap_or(idx + 1);
                    let values = record.iter().map(CellValue::from_raw_text);
                    if let Some(row) = build_row(row_number, h, values)? {
                        rows.push(row);
                    }
                }
            }
        }

        let headers = headers.ok_or_else(|| {
            ImportError::FileFormat(format!("文件缺少表头（第 {} 行）", header_row + 1))
        })?;
        Ok(Table { headers, rows })
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser {
    format: FileFormat,
}

impl ExcelParser {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// 读取第一个工作表
    fn first_sheet(&self, bytes: &[u8]) -> ImportResult<Range<Data>> {
        let cursor = Cursor::new(bytes.to_vec());
        match self.format {
            FileFormat::Xls => {
                let mut workbook: Xls<_> = Xls::new(cursor)?;
                let name = first_sheet_name(workbook.sheet_names())?;
                Ok(workbook.worksheet_range(&name)?)
            }
            _ => {
                let mut workbook: Xlsx<_> = Xlsx::new(cursor)?;
                let name = first_sheet_name(workbook.sheet_names())?;
                Ok(workbook.worksheet_range(&name)?)
            }
        }
    }
}

fn first_sheet_name(names: Vec<String>) -> ImportResult<String> {
    names
        .into_iter()
        .next()
        .ok_or_else(|| ImportError::FileFormat("Excel 文件无工作表".to_string()))
}

/// 单元格 → CellValue
fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                CellValue::Integer(*f as i64)
            } else {
                CellValue::Real(*f)
            }
        }
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) => CellValue::from_raw_text(s),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.num_seconds_from_midnight() == 0 => {
                CellValue::Text(dt.date().format("%Y-%m-%d").to_string())
            }
            Some(dt) => CellValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => CellValue::from_raw_text(&cell.to_string()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from_raw_text(s),
    }
}

impl FileParser for ExcelParser {
    fn parse(&self, bytes: &[u8], header_row: usize) -> ImportResult<Table> {
        let range = self.first_sheet(bytes)?;
        // Range 从首个非空单元格开始,行号需加上起点偏移
        let start_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);

        let mut headers: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (offset, data_row) in range.rows().enumerate() {
            let absolute = start_row + offset;
            if absolute < header_row {
                continue;
            }
            match &headers {
                None => {
                    headers = Some(clean_headers(data_row.iter().map(|c| c.to_string()))?);
                }
                Some(h) => {
                    let values = data_row.iter().map(excel_cell);
                    if let Some(row) = build_row(absolute + 1, h, values)? {
                        rows.push(row);
                    }
                }
            }
        }

        let headers = headers.ok_or_else(|| {
            ImportError::FileFormat(format!("Excel 文件缺少表头（第 {} 行）", header_row + 1))
        })?;
        Ok(Table { headers, rows })
    }
}

// ==========================================
// FileReader - 按格式选择解析器并执行表头严格匹配
// ==========================================
pub struct FileReader;

impl FileReader {
    pub fn parser_for(format: FileFormat) -> Box<dyn FileParser> {
        match format {
            FileFormat::Csv => Box::new(CsvParser),
            FileFormat::Xlsx | FileFormat::Xls => Box::new(ExcelParser::new(format)),
        }
    }

    /// 读取文件并校验表头
    ///
    /// # 返回
    /// - Err(FileFormat): 无法解析,或表头集合与声明列集合不一致
    pub fn read(bytes: &[u8], plan: &ImportPlan) -> ImportResult<Vec<RowRecord>> {
        let table = Self::parser_for(plan.file_format).parse(bytes, plan.header_row)?;
        Self::check_headers(&table.headers, &plan.declared_columns())?;

        info!(
            format = %plan.file_format,
            rows = table.rows.len(),
            columns = table.headers.len(),
            "文件解析完成"
        );
        Ok(table.rows)
    }

    /// 表头严格匹配
    pub fn check_headers(actual: &[String], declared: &[String]) -> ImportResult<()> {
        let actual: BTreeSet<&str> = actual
            .iter()
            .map(String::as_str)
            .filter(|h| !h.is_empty())
            .collect();
        let declared: BTreeSet<&str> = declared.iter().map(String::as_str).collect();

        if actual == declared {
            return Ok(());
        }

        let missing: Vec<&str> = declared.difference(&actual).copied().collect();
        let extra: Vec<&str> = actual.difference(&declared).copied().collect();
        debug!(?missing, ?extra, "表头不匹配");

        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("缺少列: {}", missing.join(", ")));
        }
        if !extra.is_empty() {
            parts.push(format!("多余列: {}", extra.join(", ")));
        }
        Err(ImportError::FileFormat(format!("表头不匹配（{}）", parts.join("; "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_parser_row_numbers_and_trim() {
        let data = " name , code \nWales, WAL \nScotland,SCO\n";
        let table = CsvParser.parse(data.as_bytes(), 0).unwrap();

        assert_eq!(table.headers, vec!["name", "code"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row_number, 2);
        assert_eq!(table.rows[0].cell("code"), &CellValue::from("WAL"));
        assert_eq!(table.rows[1].row_number, 3);
    }

    #[test]
    fn test_csv_parser_skip_empty_rows() {
        let data = "name,code\nWales,WAL\n,\nScotland,SCO\n";
        let table = CsvParser.parse(data.as_bytes(), 0).unwrap();

        // 应跳过空行,行号保持文件行号
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].row_number, 4);
        assert_eq!(table.rows[1].cell("name"), &CellValue::from("Scotland"));
    }

    #[test]
    fn test_csv_parser_rejects_data_under_blank_header() {
        let data = "email,name,\na@x.com,A,junk\n";
        let err = CsvParser.parse(data.as_bytes(), 0).unwrap_err();
        assert!(matches!(err, ImportError::FileFormat(_)));
        assert!(err.to_string().contains("第 3 列无列名"));
    }

    #[test]
    fn test_csv_parser_rejects_data_beyond_header_width() {
        let data = "email,name\na@x.com,A,junk\n";
        assert!(matches!(
            CsvParser.parse(data.as_bytes(), 0),
            Err(ImportError::FileFormat(_))
        ));
    }

    #[test]
    fn test_csv_parser_allows_empty_trailing_column() {
        // 表头尾部多一个逗号,但该列没有数据
        let data = "email,name,\na@x.com,A,\nb@x.com,B\n";
        let table = CsvParser.parse(data.as_bytes(), 0).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert!(FileReader::check_headers(
            &table.headers,
            &["email".to_string(), "name".to_string()]
        )
        .is_ok());
    }

    #[test]
    fn test_csv_parser_placeholders_become_null() {
        let data = "name,code\nnan,None\nA,\n";
        let table = CsvParser.parse(data.as_bytes(), 0).unwrap();
        // 第一行全部为占位值,视为空行
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].cell("code"), &CellValue::Null);
    }

    #[test]
    fn test_csv_parser_header_offset() {
        let data = "导出说明\nname,code\nWales,WAL\n";
        let table = CsvParser.parse(data.as_bytes(), 1).unwrap();
        assert_eq!(table.headers, vec!["name", "code"]);
        assert_eq!(table.rows[0].row_number, 3);
    }

    #[test]
    fn test_csv_parser_rejects_duplicate_headers() {
        let data = "name,name\nA,B\n";
        assert!(matches!(
            CsvParser.parse(data.as_bytes(), 0),
            Err(ImportError::FileFormat(_))
        ));
    }

    #[test]
    fn test_empty_file_has_no_header() {
        assert!(matches!(
            CsvParser.parse(b"", 0),
            Err(ImportError::FileFormat(_))
        ));
    }

    #[test]
    fn test_excel_parser_rejects_garbage() {
        let parser = ExcelParser::new(FileFormat::Xlsx);
        assert!(matches!(
            parser.parse(b"definitely not a zip archive", 0),
            Err(ImportError::FileFormat(_))
        ));
    }

    #[test]
    fn test_check_headers_strict() {
        let declared = vec!["name".to_string(), "code".to_string()];
        assert!(FileReader::check_headers(
            &["code".to_string(), "name".to_string()],
            &declared
        )
        .is_ok());

        let extra = FileReader::check_headers(
            &["code".to_string(), "name".to_string(), "x".to_string()],
            &declared,
        )
        .unwrap_err();
        assert!(extra.to_string().contains("多余列: x"));

        let missing = FileReader::check_headers(&["name".to_string()], &declared).unwrap_err();
        assert!(missing.to_string().contains("缺少列: code"));
    }
}
