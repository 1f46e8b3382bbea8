// ==========================================
// 表格导入引擎 - 领域模型层
// ==========================================
// 职责: 定义导入配置、行记录、结果汇总等纯数据结构
// 红线: 不含数据访问逻辑,不含导入流程逻辑
// ==========================================

pub mod import_config;
pub mod import_record;
pub mod types;

// 重导出核心类型
pub use import_config::{
    ComputeMode, FieldMapping, ImportPlan, LookupSpec, MappingStage, RawImportConfig,
    RawStepConfig, StepPlan,
};
pub use import_record::{
    ImportErrorRecord, ImportReport, ImportSummary, PendingUpdate, RowError, RowOutcome,
    RowRecord, StagedEntity,
};
pub use types::{CellValue, EntityId, FieldValues, FileFormat, ImportMode, RowStatus};
