// ==========================================
// 表格导入引擎 - 行记录与导入结果
// ==========================================
// 职责: RowRecord（行状态机）、StagedEntity、汇总结构
// 红线: 行状态单调,Failed 之后不再接受任何变更
// ==========================================

use crate::domain::types::{CellValue, EntityId, FieldValues, ImportMode, RowStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ==========================================
// 行级错误
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub field: Option<String>,
    pub message: String,
}

impl RowError {
    pub fn new(field: Option<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Some(field.into()), message)
    }
}

// ==========================================
// RowRecord - 单行输入
// ==========================================
#[derive(Debug, Clone)]
pub struct RowRecord {
    pub row_number: usize,
    pub cells: HashMap<String, CellValue>,
    /// 各步骤为本行产出的实体 id（步骤名 → id）
    pub references: HashMap<String, EntityId>,
    status: RowStatus,
    errors: Vec<RowError>,
}

impl RowRecord {
    pub fn new(row_number: usize, cells: HashMap<String, CellValue>) -> Self {
        Self {
            row_number,
            cells,
            references: HashMap::new(),
            status: RowStatus::Pending,
            errors: Vec::new(),
        }
    }

    pub fn status(&self) -> RowStatus {
        self.status
    }

    pub fn errors(&self) -> &[RowError] {
        &self.errors
    }

    pub fn is_failed(&self) -> bool {
        self.status == RowStatus::Failed
    }

    /// 读取列值（缺列视为 Null）
    pub fn cell(&self, column: &str) -> &CellValue {
        static NULL: CellValue = CellValue::Null;
        self.cells.get(column).unwrap_or(&NULL)
    }

    /// 标记失败
    ///
    /// # 返回
    /// - true: 本次调用完成了 Pending → Failed 迁移
    /// - false: 行已处于终态,未做任何修改
    pub fn mark_failed(&mut self, error: RowError) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RowStatus::Failed;
        self.errors.push(error);
        true
    }

    /// 存活到最后一个步骤的行隐式成功
    pub fn mark_succeeded(&mut self) {
        if self.status == RowStatus::Pending {
            self.status = RowStatus::Succeeded;
        }
    }

    pub fn record_reference(&mut self, step: &str, id: EntityId) {
        if !self.is_failed() {
            self.references.insert(step.to_string(), id);
        }
    }
}

// ==========================================
// StagedEntity - 待落库实体
// ==========================================
// 归属单个步骤的处理过程,落库后提升为持久实体或丢弃
#[derive(Debug, Clone)]
pub struct StagedEntity {
    pub values: FieldValues,
    /// 贡献该实体的行（chunk 内下标,按行号递增）
    pub rows: Vec<usize>,
}

impl StagedEntity {
    pub fn new(values: FieldValues, row_index: usize) -> Self {
        Self {
            values,
            rows: vec![row_index],
        }
    }

    /// 合并同唯一键后续行的值（后行覆盖前行）
    pub fn merge(&mut self, values: FieldValues, row_index: usize) {
        self.values.extend(values);
        self.rows.push(row_index);
    }
}

/// 针对已存在实体的更新
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub id: EntityId,
    pub values: FieldValues,
    pub row_index: usize,
}

// ==========================================
// 汇总结构
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportErrorRecord {
    pub row: usize,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<ImportErrorRecord>,
    /// 超出展示上限、未逐条列出的错误数
    pub omitted_errors: usize,
}

impl ImportSummary {
    /// 由最终行状态汇总（只在 run 结束时调用一次）
    pub fn from_rows(
        rows: &[RowRecord],
        created: usize,
        updated: usize,
        display_limit: usize,
    ) -> Self {
        let failed = rows.iter().filter(|r| r.is_failed()).count();
        let all_errors: Vec<ImportErrorRecord> = rows
            .iter()
            .filter(|r| r.is_failed())
            .flat_map(|r| {
                r.errors().iter().map(move |e| ImportErrorRecord {
                    row: r.row_number,
                    field: e.field.clone(),
                    message: e.message.clone(),
                })
            })
            .collect();

        let omitted_errors = all_errors.len().saturating_sub(display_limit);
        let errors = all_errors.into_iter().take(display_limit).collect();

        Self {
            processed: rows.len(),
            created,
            updated,
            failed,
            errors,
            omitted_errors,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowOutcome {
    pub row: usize,
    pub status: RowStatus,
    pub errors: Vec<RowError>,
}

impl From<&RowRecord> for RowOutcome {
    fn from(row: &RowRecord) -> Self {
        Self {
            row: row.row_number,
            status: row.status(),
            errors: row.errors().to_vec(),
        }
    }
}

/// 一次导入运行的完整结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub run_id: String,
    pub mode: ImportMode,
    pub summary: ImportSummary,
    /// Replace 模式下被清空的旧记录数（回滚时为 0）
    pub deleted_count: usize,
    /// Replace 模式因失败行整体回滚
    pub rolled_back: bool,
    pub rows: Vec<RowOutcome>,
    pub elapsed_ms: u128,
}
