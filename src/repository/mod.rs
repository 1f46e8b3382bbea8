// ==========================================
// 表格导入引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供实体存储接口,屏蔽数据库细节
// 约束: 值一律参数化绑定;标识符经白名单校验后再拼接
// ==========================================

pub mod entity_store;
pub mod entity_store_impl;
pub mod error;

// 重导出核心仓储
pub use entity_store::{EntityStore, StoredEntity};
pub use entity_store_impl::SqliteEntityStore;
pub use error::{StoreError, StoreResult};
