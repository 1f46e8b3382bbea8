// ==========================================
// 表格导入引擎 - 导入运行参数读取 Trait
// ==========================================
// 职责: 定义导入管道所需的运行参数读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use std::error::Error;

/// 默认批量写入条数
pub const DEFAULT_BATCH_SIZE: usize = 250;

/// 默认失败行展示上限
pub const DEFAULT_FAILED_ROWS_DISPLAY_LIMIT: usize = 10;

// ==========================================
// ImportSettingsReader Trait
// ==========================================
// 用途: 导入管道所需的运行参数读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait ImportSettingsReader {
    /// 单条批量语句的记录数上限
    ///
    /// # 默认值
    /// - 250
    fn get_batch_size(&self) -> Result<usize, Box<dyn Error>>;

    /// 汇总中逐条列出的失败记录上限
    ///
    /// # 默认值
    /// - 10
    fn get_failed_rows_display_limit(&self) -> Result<usize, Box<dyn Error>>;

    /// 未在导入配置与调用参数中指定时使用的 chunk 大小
    ///
    /// # 返回
    /// - None: 不分块（整表一个 chunk）
    fn get_default_chunk_size(&self) -> Result<Option<usize>, Box<dyn Error>>;
}

/// 导入运行参数快照（一次运行内不变）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub failed_rows_display_limit: usize,
    pub default_chunk_size: Option<usize>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            failed_rows_display_limit: DEFAULT_FAILED_ROWS_DISPLAY_LIMIT,
            default_chunk_size: None,
        }
    }
}

impl ImportSettings {
    /// 从读取器加载全部参数
    pub fn load(reader: &dyn ImportSettingsReader) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            batch_size: reader.get_batch_size()?,
            failed_rows_display_limit: reader.get_failed_rows_display_limit()?,
            default_chunk_size: reader.get_default_chunk_size()?,
        })
    }
}
