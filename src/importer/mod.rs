// ==========================================
// 表格导入引擎 - 导入层
// ==========================================
// 职责: 按配置将 CSV/Excel 表格逐行映射为实体并落库
// 支持: CSV, XLSX, XLS
// ==========================================

// 模块声明
pub mod bulk_operations;
pub mod config_validator;
pub mod data_processor;
pub mod error;
pub mod file_parser;
pub mod lookup_manager;
pub mod object_manager;
pub mod orchestrator;
pub mod template;
pub mod transforms;

// 重导出核心类型
pub use bulk_operations::{BulkOperations, PersistOutcome};
pub use config_validator::{parse_config, ConfigValidator};
pub use data_processor::DataProcessor;
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, ExcelParser, FileParser, FileReader, Table};
pub use lookup_manager::{LookupCache, LookupManager};
pub use object_manager::{Classification, ObjectManager};
pub use orchestrator::{ImportOptions, TableImporter};
pub use template::{ColumnOrder, ImportTemplate};
pub use transforms::{GeneratorContext, TransformRegistry};
