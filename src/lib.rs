// ==========================================
// 表格导入引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + csv/calamine
// 定位: 声明式多步骤表格导入（CSV/Excel → 关系型存储）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 配置与行模型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 导入管道
pub mod importer;

// 配置层 - 运行参数
pub mod config;

// 导出层 - CSV 导出
pub mod exporter;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{CellValue, EntityId, FieldValues, FileFormat, ImportMode, RowStatus};

// 配置与结果
pub use domain::{
    FieldMapping, ImportErrorRecord, ImportPlan, ImportReport, ImportSummary, RawImportConfig,
    RowOutcome, StepPlan,
};

// 仓储
pub use repository::{EntityStore, SqliteEntityStore, StoreError, StoreResult};

// 导入管道
pub use importer::{
    parse_config, ColumnOrder, ConfigValidator, ImportError, ImportOptions, ImportResult,
    ImportTemplate, TableImporter, TransformRegistry,
};

// 配置
pub use config::{ConfigManager, ImportSettings, ImportSettingsReader};

// 导出
pub use exporter::CsvExporter;

// ==========================================
// 入口函数
// ==========================================

/// 校验导入配置（不读取文件、不写入数据）
///
/// # 返回
/// - Ok(ImportPlan): 校验通过后的封闭计划
/// - Err(ImportError::Configuration): 第一个不合法的配置项
pub fn validate_config(
    raw: &RawImportConfig,
    transforms: &TransformRegistry,
    store: &dyn EntityStore,
) -> ImportResult<ImportPlan> {
    ConfigValidator::new(transforms, store).validate(raw)
}

/// 校验配置并导入一个文件（使用默认运行参数）
///
/// # 参数
/// - bytes: 文件内容
/// - raw: 原始导入配置
/// - transforms: 配置引用的转换函数/生成器
/// - store: 目标存储
/// - options: 导入模式与 chunk 大小
pub fn import_table<S: EntityStore>(
    bytes: &[u8],
    raw: &RawImportConfig,
    transforms: &TransformRegistry,
    store: &S,
    options: ImportOptions,
) -> ImportResult<ImportReport> {
    let plan = validate_config(raw, transforms, store)?;
    TableImporter::new(store, transforms, ImportSettings::default()).import_table(&plan, bytes, options)
}

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "表格导入引擎";
