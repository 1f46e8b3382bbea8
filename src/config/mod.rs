// ==========================================
// 表格导入引擎 - 配置层
// ==========================================
// 职责: 导入运行参数管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_settings_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use import_settings_trait::{ImportSettings, ImportSettingsReader};
